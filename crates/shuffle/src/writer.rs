use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use spool_common::{QueryId, Result, SpoolError, StageId, TaskId};
use spool_exchange::{ExchangeSourceHandle, encode_page};
use tracing::debug;

use crate::layout::{
    MapTaskIndex, SpoolPartitionMeta, index_bin_path, index_json_path, map_task_dir,
    partition_path,
};

pub(crate) const INDEX_BIN_MAGIC: &[u8; 4] = b"SPLI";
pub(crate) const INDEX_BIN_VERSION: u32 = 1;
pub(crate) const INDEX_BIN_HEADER_LEN: usize = 12;

/// Producer side of the spool: writes one attempt of a map task.
pub struct SpoolWriter {
    root_dir: PathBuf,
    query_id: QueryId,
    stage_id: StageId,
    map_task: TaskId,
    attempt: u32,
}

impl SpoolWriter {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        query_id: QueryId,
        stage_id: StageId,
        map_task: TaskId,
        attempt: u32,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            query_id,
            stage_id,
            map_task,
            attempt,
        }
    }

    /// Spool `batches` as one partition file (a single page).
    pub fn write_partition(
        &self,
        partition: u32,
        batches: &[RecordBatch],
    ) -> Result<SpoolPartitionMeta> {
        if batches.is_empty() {
            return Err(SpoolError::InvalidConfig(
                "spool partition cannot be empty".to_string(),
            ));
        }
        let rel = partition_path(
            self.query_id,
            self.stage_id,
            self.map_task,
            self.attempt,
            partition,
        );
        let abs = self.root_dir.join(&rel);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }

        let page = encode_page(batches)?;
        let mut file = File::create(&abs)?;
        file.write_all(&page)?;
        file.flush()?;

        let rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
        debug!(file = %rel, bytes = page.len(), rows, "spooled partition");
        Ok(SpoolPartitionMeta {
            partition,
            file: rel,
            bytes: page.len() as u64,
            rows,
            batches: batches.len() as u64,
        })
    }

    /// Persist the index of this attempt as JSON and as a framed binary
    /// copy, and return it.
    pub fn commit(&self, mut partitions: Vec<SpoolPartitionMeta>) -> Result<MapTaskIndex> {
        partitions.sort_by_key(|p| p.partition);
        let index = MapTaskIndex {
            query_id: self.query_id,
            stage_id: self.stage_id,
            map_task: self.map_task,
            attempt: self.attempt,
            partitions,
        };

        let dir = self.root_dir.join(map_task_dir(
            self.query_id,
            self.stage_id,
            self.map_task,
            self.attempt,
        ));
        fs::create_dir_all(&dir)?;

        let json_bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| SpoolError::Execution(format!("index json encode failed: {e}")))?;
        fs::write(
            self.root_dir.join(index_json_path(
                self.query_id,
                self.stage_id,
                self.map_task,
                self.attempt,
            )),
            &json_bytes,
        )?;
        let bin_path = self.root_dir.join(index_bin_path(
            self.query_id,
            self.stage_id,
            self.map_task,
            self.attempt,
        ));
        write_binary_index(&bin_path, &json_bytes)?;

        Ok(index)
    }

    /// Write each partition and commit the index; returns the handles a
    /// consumer needs to read them back.
    pub fn write_all(
        &self,
        partitions: &[(u32, Vec<RecordBatch>)],
    ) -> Result<Vec<ExchangeSourceHandle>> {
        let metas = partitions
            .iter()
            .map(|(p, batches)| self.write_partition(*p, batches))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.commit(metas)?.source_handles())
    }
}

fn write_binary_index(path: &Path, json_payload: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(INDEX_BIN_HEADER_LEN + json_payload.len());
    out.extend_from_slice(INDEX_BIN_MAGIC);
    out.extend_from_slice(&INDEX_BIN_VERSION.to_le_bytes());
    out.extend_from_slice(&(json_payload.len() as u32).to_le_bytes());
    out.extend_from_slice(json_payload);
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use spool_common::{QueryId, StageId, TaskId};

    use spool_exchange::decode_page;

    use super::SpoolWriter;
    use crate::reader::{SpoolReader, reassemble};

    fn temp_spool_root() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("spool_writer_test_{nanos}"))
    }

    #[test]
    fn committed_index_resolves_chunked_partition() {
        let root = temp_spool_root();
        let writer = SpoolWriter::new(&root, QueryId(100), StageId(2), TaskId(7), 1);

        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1_i64, 2, 3]))],
        )
        .expect("batch");

        let meta = writer.write_partition(3, &[batch]).expect("write partition");
        let idx = writer.commit(vec![meta.clone()]).expect("commit");
        assert_eq!(idx.partitions.len(), 1);
        assert_eq!(idx.partitions[0].partition, 3);
        assert_eq!(idx.partitions[0].rows, 3);

        let reader = SpoolReader::new(&root).with_fetch_chunk_bytes(7);
        let read_back = reader
            .read_map_task_index(QueryId(100), StageId(2), TaskId(7), 1)
            .expect("read index");
        assert_eq!(read_back.partitions[0].bytes, meta.bytes);
        assert_eq!(read_back.source_handles(), idx.source_handles());

        let handles = idx.source_handles();
        let chunks = reader.fetch_partition_chunks(&handles[0]).expect("chunks");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        let batches = decode_page(&reassemble(chunks)).expect("decode");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 3);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn empty_partition_is_rejected() {
        let root = temp_spool_root();
        let writer = SpoolWriter::new(&root, QueryId(1), StageId(1), TaskId(1), 0);
        assert!(writer.write_partition(0, &[]).is_err());
        let _ = std::fs::remove_dir_all(root);
    }
}
