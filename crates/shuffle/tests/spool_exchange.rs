use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use spool_common::{
    ExchangeConfig, LocalMemoryContext, MemoryPool, QueryId, SimpleLocalMemoryContext, StageId,
    TaskId,
};
use spool_exchange::{
    ExchangeDataSource, ExchangeInput, ExchangeOperatorFactory, ExchangeSource,
    ExchangeSourceHandle, SpoolingExchangeInput,
};
use spool_shuffle::{
    FileSystemExchangeSource, SpoolReader, SpoolWriter, handle_path, open_spooling_data_source,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn temp_spool_root(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("spool_exchange_{tag}_{nanos}"))
}

fn config(root: &Path) -> ExchangeConfig {
    ExchangeConfig {
        spool_dir: root.to_string_lossy().to_string(),
        fetch_chunk_bytes: 64,
        cleanup_on_close: false,
    }
}

fn batch(values: Vec<i64>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("batch")
}

/// Spools partitions 0..`partitions`, each holding `rows_per_partition` rows.
fn spool(root: &Path, partitions: u32, rows_per_partition: i64) -> Vec<ExchangeSourceHandle> {
    let writer = SpoolWriter::new(root, QueryId(9), StageId(3), TaskId(1), 0);
    let parts = (0..partitions)
        .map(|p| {
            let base = p as i64 * rows_per_partition;
            (p, vec![batch((base..base + rows_per_partition).collect())])
        })
        .collect::<Vec<_>>();
    writer.write_all(&parts).expect("spool partitions")
}

fn sum_column(batches: &[RecordBatch]) -> i64 {
    batches
        .iter()
        .map(|b| {
            let col = b
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("int64 column");
            col.values().iter().sum::<i64>()
        })
        .sum()
}

#[test]
fn operators_sharing_a_data_source_read_every_row_once() {
    init_tracing();
    let root = temp_spool_root("shared");
    let handles = spool(&root, 4, 25);
    let pool = MemoryPool::new();
    let memory = Arc::new(pool.new_local_context("exchange-0"));

    let ds = open_spooling_data_source(&config(&root), handles.clone(), memory.clone())
        .expect("open data source");
    assert_eq!(ds.handles(), handles.as_slice());
    let factory = ExchangeOperatorFactory::new(Arc::new(ds));
    let mut operators = (0..2).map(|_| factory.create_operator()).collect::<Vec<_>>();

    let input: ExchangeInput = SpoolingExchangeInput::new(handles).into();
    for op in &mut operators {
        op.add_input(&input).expect("same input for every instance");
        op.no_more_inputs();
    }

    let mut batches = Vec::new();
    while operators.iter().any(|op| !op.is_finished()) {
        for op in &mut operators {
            if let Some(b) = op.output().expect("output") {
                batches.push(b);
            }
        }
    }
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 100);
    assert_eq!(sum_column(&batches), (0..100).sum::<i64>());
    assert!(pool.peak_bytes() > 0);

    for op in &mut operators {
        op.close();
    }
    assert_eq!(memory.bytes(), 0);
    assert_eq!(pool.reserved_bytes(), 0);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn early_finish_releases_source_and_cleans_spool() {
    init_tracing();
    let root = temp_spool_root("limit");
    let handles = spool(&root, 3, 10);
    let cfg = ExchangeConfig {
        cleanup_on_close: true,
        ..config(&root)
    };
    let memory = SimpleLocalMemoryContext::new();
    let ds = Arc::new(
        open_spooling_data_source(&cfg, handles.clone(), memory.clone()).expect("open"),
    );
    let factory = ExchangeOperatorFactory::new(ds.clone());
    let mut op = factory.create_operator();

    let first = op.output().expect("output").expect("first batch");
    assert_eq!(first.num_rows(), 10);
    assert!(memory.bytes() > 0, "next partition is prefetched");

    // LIMIT satisfied.
    op.finish();
    assert!(op.is_finished());
    assert!(ds.is_finished());
    assert!(factory.data_source().is_finished());
    assert_eq!(memory.bytes(), 0);
    for h in &handles {
        assert!(!root.join(handle_path(h)).exists());
    }

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn memory_usage_tracks_prefetched_partition() {
    let root = temp_spool_root("prefetch");
    let handles = spool(&root, 2, 5);
    let source = FileSystemExchangeSource::new(&config(&root), handles.clone()).expect("source");
    assert_eq!(source.handles(), handles.as_slice());
    assert_eq!(source.memory_usage(), 0);

    let first = source.read().expect("read").expect("page");
    assert_eq!(first.len() as u64, handles[0].data_size_bytes);
    assert_eq!(source.memory_usage(), handles[1].data_size_bytes);
    assert!(!source.is_finished());

    let second = source.read().expect("read").expect("page");
    assert_eq!(second.len() as u64, handles[1].data_size_bytes);
    assert_eq!(source.memory_usage(), 0);
    assert!(source.is_finished());
    assert!(source.read().expect("read").is_none());

    source.close().expect("close");
    source.close().expect("second close is a no-op");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn missing_partition_file_surfaces_as_read_error() {
    let root = temp_spool_root("missing");
    let handles = spool(&root, 2, 5);
    std::fs::remove_file(root.join(handle_path(&handles[0]))).expect("remove partition");

    let memory = SimpleLocalMemoryContext::new();
    let ds = open_spooling_data_source(&config(&root), handles, memory.clone()).expect("open");
    assert!(ds.poll_page().is_err());
    assert!(ds.poll_page().is_err(), "failed handle stays pending");
    assert!(!ds.is_finished());

    ds.close();
    assert!(ds.is_finished());
    assert!(ds.poll_page().expect("poll after close").is_none());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn cleanup_failure_does_not_escape_close() {
    init_tracing();
    let root = temp_spool_root("cleanup");
    let handles = spool(&root, 1, 3);
    // A directory where the partition file should be makes remove_file fail.
    let path = root.join(handle_path(&handles[0]));
    std::fs::remove_file(&path).expect("remove partition");
    std::fs::create_dir_all(&path).expect("blocking directory");

    let cfg = ExchangeConfig {
        cleanup_on_close: true,
        ..config(&root)
    };
    let source = FileSystemExchangeSource::new(&cfg, handles.clone()).expect("source");
    assert!(source.close().is_err());

    let memory = SimpleLocalMemoryContext::new();
    let ds = open_spooling_data_source(&cfg, handles, memory.clone()).expect("open");
    ds.close();
    ds.close();
    assert!(ds.is_finished());
    assert_eq!(memory.bytes(), 0);
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn close_racing_with_pollers_settles_closed() {
    let root = temp_spool_root("race");
    let handles = spool(&root, 16, 50);

    for _ in 0..10 {
        let pool = MemoryPool::new();
        let memory = Arc::new(pool.new_local_context("racy"));
        let ds = open_spooling_data_source(&config(&root), handles.clone(), memory.clone())
            .expect("open");

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    while !ds.is_finished() {
                        ds.poll_page().expect("poll");
                    }
                });
            }
            s.spawn(|| ds.close());
        });

        assert!(ds.is_finished());
        assert!(ds.poll_page().expect("poll").is_none());
        assert_eq!(pool.reserved_bytes(), 0);
    }

    let reader = SpoolReader::new(&root);
    let latest = reader
        .latest_source_handles(QueryId(9), StageId(3), TaskId(1))
        .expect("latest handles");
    assert_eq!(latest, handles, "spool untouched without cleanup_on_close");
    let _ = std::fs::remove_dir_all(root);
}
