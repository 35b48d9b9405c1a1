//! Exchange operator: the pipeline-facing reader of an exchange data source.
//!
//! A pipeline runs several instances of the operator that all share one
//! [`ExchangeDataSource`]. Each instance forwards the inputs it receives,
//! decodes polled pages into record batches, and closes the shared data
//! source once it is done or no more rows are wanted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::record_batch::RecordBatch;
use spool_common::Result;
use tracing::debug;

use crate::data_source::{ExchangeDataSource, OperatorInfo};
use crate::handle::ExchangeInput;
use crate::page::decode_page;
use crate::source::{BlockedFuture, not_blocked};

/// Creates operator instances that share one data source.
pub struct ExchangeOperatorFactory {
    data_source: Arc<dyn ExchangeDataSource>,
    next_operator_id: AtomicUsize,
}

impl ExchangeOperatorFactory {
    pub fn new(data_source: Arc<dyn ExchangeDataSource>) -> Self {
        Self {
            data_source,
            next_operator_id: AtomicUsize::new(0),
        }
    }

    pub fn create_operator(&self) -> ExchangeOperator {
        let operator_id = self.next_operator_id.fetch_add(1, Ordering::Relaxed);
        ExchangeOperator {
            operator_id,
            data_source: Arc::clone(&self.data_source),
            pending: VecDeque::new(),
            stats: ExchangeOperatorStats::default(),
            closed: false,
        }
    }

    pub fn data_source(&self) -> &Arc<dyn ExchangeDataSource> {
        &self.data_source
    }
}

/// Input counters of one operator instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeOperatorStats {
    pub pages: u64,
    pub bytes: u64,
    pub batches: u64,
    pub rows: u64,
}

pub struct ExchangeOperator {
    operator_id: usize,
    data_source: Arc<dyn ExchangeDataSource>,
    pending: VecDeque<RecordBatch>,
    stats: ExchangeOperatorStats,
    closed: bool,
}

impl ExchangeOperator {
    pub fn operator_id(&self) -> usize {
        self.operator_id
    }

    pub fn add_input(&mut self, input: &ExchangeInput) -> Result<()> {
        self.data_source.add_input(input)
    }

    pub fn no_more_inputs(&mut self) {
        self.data_source.no_more_inputs();
    }

    /// Next decoded batch, or `None` when the data source has nothing ready.
    pub fn output(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(batch) = self.pending.pop_front() {
            return Ok(Some(batch));
        }
        if self.closed {
            return Ok(None);
        }
        let Some(page) = self.data_source.poll_page()? else {
            return Ok(None);
        };

        let batches = decode_page(&page)?;
        self.stats.pages += 1;
        self.stats.bytes += page.len() as u64;
        self.stats.batches += batches.len() as u64;
        self.stats.rows += batches.iter().map(|b| b.num_rows() as u64).sum::<u64>();
        self.pending.extend(batches);
        Ok(self.pending.pop_front())
    }

    pub fn is_blocked(&self) -> BlockedFuture {
        if !self.pending.is_empty() || self.closed {
            return not_blocked();
        }
        self.data_source.is_blocked()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && (self.closed || self.data_source.is_finished())
    }

    /// Stop reading early; releases the shared data source for every
    /// instance.
    pub fn finish(&mut self) {
        self.close();
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.data_source.close();
        debug!(
            operator_id = self.operator_id,
            pages = self.stats.pages,
            rows = self.stats.rows,
            "exchange operator closed"
        );
    }

    pub fn stats(&self) -> ExchangeOperatorStats {
        self.stats
    }

    pub fn info(&self) -> Option<OperatorInfo> {
        self.data_source.info()
    }

    /// Drive the operator to completion, waiting on the blocked signal
    /// whenever no batch is ready.
    pub async fn collect(&mut self) -> Result<Vec<RecordBatch>> {
        let mut out = Vec::new();
        loop {
            if let Some(batch) = self.output()? {
                out.push(batch);
                continue;
            }
            if self.is_finished() {
                return Ok(out);
            }
            self.is_blocked().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use bytes::Bytes;
    use spool_common::SpoolError;

    use super::*;
    use crate::page::encode_page;

    /// In-memory data source handing out a fixed list of pages.
    struct QueueDataSource {
        pages: Mutex<VecDeque<Bytes>>,
        closes: AtomicUsize,
    }

    impl QueueDataSource {
        fn new(pages: Vec<Bytes>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl ExchangeDataSource for QueueDataSource {
        fn poll_page(&self) -> Result<Option<Bytes>> {
            Ok(self.pages.lock().expect("lock").pop_front())
        }

        fn is_finished(&self) -> bool {
            self.pages.lock().expect("lock").is_empty()
        }

        fn is_blocked(&self) -> BlockedFuture {
            not_blocked()
        }

        fn add_input(&self, _input: &ExchangeInput) -> Result<()> {
            Err(SpoolError::Unsupported("no inputs".to_string()))
        }

        fn no_more_inputs(&self) {}

        fn info(&self) -> Option<OperatorInfo> {
            None
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.pages.lock().expect("lock").clear();
        }
    }

    fn page(values: &[Vec<i64>]) -> Bytes {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batches = values
            .iter()
            .map(|v| {
                RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(v.clone()))])
                    .expect("batch")
            })
            .collect::<Vec<_>>();
        encode_page(&batches).expect("encode")
    }

    #[test]
    fn decodes_pages_into_batches() {
        let ds = QueueDataSource::new(vec![page(&[vec![1, 2], vec![3]]), page(&[vec![4]])]);
        let factory = ExchangeOperatorFactory::new(ds);
        let mut op = factory.create_operator();

        let mut rows = 0;
        while let Some(batch) = op.output().expect("output") {
            rows += batch.num_rows();
        }
        assert_eq!(rows, 4);
        assert!(op.is_finished());
        let stats = op.stats();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.rows, 4);
        assert!(stats.bytes > 0);
    }

    #[test]
    fn operators_get_distinct_ids_and_share_source() {
        let ds = QueueDataSource::new(vec![page(&[vec![1]])]);
        let factory = ExchangeOperatorFactory::new(ds.clone());
        let mut a = factory.create_operator();
        let mut b = factory.create_operator();
        assert_ne!(a.operator_id(), b.operator_id());

        assert!(a.output().expect("a").is_some());
        assert!(b.output().expect("b").is_none());
        assert!(b.is_finished());

        a.finish();
        b.close();
        b.close();
        assert_eq!(ds.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn finish_drops_buffered_batches() {
        let ds = QueueDataSource::new(vec![page(&[vec![1], vec![2]]), page(&[vec![3]])]);
        let factory = ExchangeOperatorFactory::new(ds);
        let mut op = factory.create_operator();

        assert!(op.output().expect("output").is_some());
        op.finish();
        assert!(op.output().expect("after finish").is_none());
        assert!(op.is_finished());
        assert_eq!(op.stats().rows, 2);
    }

    #[test]
    fn corrupt_page_surfaces_error() {
        let ds = QueueDataSource::new(vec![Bytes::from_static(b"garbage")]);
        let factory = ExchangeOperatorFactory::new(ds);
        let mut op = factory.create_operator();
        assert!(op.output().is_err());
    }
}
