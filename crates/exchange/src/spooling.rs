//! Exchange data source over spooled intermediate data.
//!
//! The data source owns exactly one [`ExchangeSource`] and is shared by every
//! exchange operator instance of a pipeline. Any of them, or a cancellation
//! path, may close it at any moment while others are still polling:
//! - the source lives in an atomically swappable slot that is loaded once per
//!   call (snapshot), never checked and then re-read
//! - teardown runs under its own mutex, which the read path never takes
//! - accounting is zeroed by close, and a poll that finishes after close
//!   zeroes it again

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use spool_common::{LocalMemoryContext, PageMetrics, Result, SpoolError, global_metrics};
use tracing::{debug, warn};

use crate::data_source::{ExchangeDataSource, OperatorInfo};
use crate::handle::{ExchangeInput, ExchangeSourceHandle, display_handles};
use crate::source::{BlockedFuture, ExchangeSource, not_blocked};

pub struct SpoolingExchangeDataSource {
    // Emptied exactly once, by `close`. The extra `Arc` layer is there
    // because the swap cell only holds sized pointees.
    source: ArcSwapOption<Arc<dyn ExchangeSource>>,
    handles: Vec<ExchangeSourceHandle>,
    memory: Arc<dyn LocalMemoryContext>,
    closed: AtomicBool,
    close_lock: Mutex<()>,
    labels: (String, String),
    page_metrics: PageMetrics,
}

impl SpoolingExchangeDataSource {
    pub fn new(
        source: Arc<dyn ExchangeSource>,
        handles: Vec<ExchangeSourceHandle>,
        memory: Arc<dyn LocalMemoryContext>,
    ) -> Self {
        let labels = handles
            .first()
            .map(|h| (h.query_id.to_string(), h.stage_id.to_string()))
            .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
        let page_metrics = global_metrics().page_metrics(&labels.0, &labels.1);
        debug!(
            query_id = %labels.0,
            stage_id = %labels.1,
            handles = handles.len(),
            "spooling exchange data source created"
        );
        Self {
            source: ArcSwapOption::from_pointee(source),
            handles,
            memory,
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
            labels,
            page_metrics,
        }
    }

    pub fn handles(&self) -> &[ExchangeSourceHandle] {
        &self.handles
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Option<Arc<dyn ExchangeSource>> {
        self.source.load_full().as_deref().cloned()
    }
}

impl ExchangeDataSource for SpoolingExchangeDataSource {
    fn poll_page(&self) -> Result<Option<Bytes>> {
        let Some(source) = self.snapshot() else {
            return Ok(None);
        };

        let page = source.read()?;
        let usage = source.memory_usage();
        self.memory.set_bytes(usage);
        self.page_metrics.set_memory_bytes(usage);

        // A close that raced with the read must still leave zero behind.
        if self.closed.load(Ordering::SeqCst) {
            self.memory.set_bytes(0);
            self.page_metrics.set_memory_bytes(0);
        }

        if let Some(page) = &page {
            self.page_metrics.record_page(page.len() as u64);
        }
        Ok(page)
    }

    fn is_finished(&self) -> bool {
        match self.snapshot() {
            Some(source) => source.is_finished(),
            None => true,
        }
    }

    fn is_blocked(&self) -> BlockedFuture {
        match self.snapshot() {
            Some(source) => source.is_blocked(),
            None => not_blocked(),
        }
    }

    fn add_input(&self, input: &ExchangeInput) -> Result<()> {
        // The driver hands the same input to every operator instance sharing
        // this data source, so identical repeats are expected.
        match input {
            ExchangeInput::Spooling(spooling) if spooling.handles() == self.handles.as_slice() => {
                Ok(())
            }
            ExchangeInput::Spooling(spooling) => Err(SpoolError::IllegalState(format!(
                "exchange input is expected to contain an identical source handle list: {} != {}",
                display_handles(spooling.handles()),
                display_handles(&self.handles),
            ))),
            ExchangeInput::Direct(direct) => Err(SpoolError::IllegalState(format!(
                "spooling exchange cannot accept direct input from task {} at {}",
                direct.task_id, direct.location
            ))),
        }
    }

    fn no_more_inputs(&self) {
        // The only input is known at construction time.
    }

    fn info(&self) -> Option<OperatorInfo> {
        None
    }

    fn close(&self) {
        let _serial = self.close_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);

        let source = self.source.swap(None);
        let _reset = ResetOnExit {
            memory: self.memory.as_ref(),
            page_metrics: &self.page_metrics,
        };

        let Some(source) = source else {
            return;
        };
        let failed = match panic::catch_unwind(AssertUnwindSafe(|| source.close())) {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(
                    query_id = %self.labels.0,
                    stage_id = %self.labels.1,
                    error = %e,
                    "error closing exchange source"
                );
                true
            }
            Err(payload) => {
                warn!(
                    query_id = %self.labels.0,
                    stage_id = %self.labels.1,
                    panic = panic_message(payload.as_ref()),
                    "exchange source panicked while closing"
                );
                true
            }
        };
        global_metrics().record_source_closed(&self.labels.0, &self.labels.1, failed);
        debug!(
            query_id = %self.labels.0,
            stage_id = %self.labels.1,
            "spooling exchange data source closed"
        );
    }
}

impl fmt::Debug for SpoolingExchangeDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpoolingExchangeDataSource")
            .field("handles", &self.handles.len())
            .field("closed", &self.is_closed())
            .field("memory_bytes", &self.memory.bytes())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Zeroes accounting when dropped, so every exit path out of `close` leaves
/// zero behind.
struct ResetOnExit<'a> {
    memory: &'a dyn LocalMemoryContext,
    page_metrics: &'a PageMetrics,
}

impl Drop for ResetOnExit<'_> {
    fn drop(&mut self) {
        self.memory.set_bytes(0);
        self.page_metrics.set_memory_bytes(0);
    }
}
