//! [`ExchangeSource`] over partitions spooled on the local filesystem.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use spool_common::{ExchangeConfig, LocalMemoryContext, Result, SpoolError};
use spool_exchange::{
    BlockedFuture, ExchangeSource, ExchangeSourceHandle, SpoolingExchangeDataSource, not_blocked,
};
use tracing::{debug, warn};

use crate::layout::handle_path;
use crate::reader::SpoolReader;

/// Reads one page per spooled partition, in handle order.
///
/// The partition after the one just returned is fetched eagerly; its size is
/// what [`ExchangeSource::memory_usage`] reports.
pub struct FileSystemExchangeSource {
    reader: SpoolReader,
    handles: Vec<ExchangeSourceHandle>,
    cleanup_on_close: bool,
    state: Mutex<SourceState>,
    buffered_bytes: AtomicU64,
}

#[derive(Default)]
struct SourceState {
    pending: VecDeque<ExchangeSourceHandle>,
    buffered: Option<Bytes>,
    closed: bool,
}

impl FileSystemExchangeSource {
    pub fn new(config: &ExchangeConfig, handles: Vec<ExchangeSourceHandle>) -> Result<Self> {
        config.validate()?;
        let reader =
            SpoolReader::new(&config.spool_dir).with_fetch_chunk_bytes(config.fetch_chunk_bytes);
        Ok(Self {
            reader,
            state: Mutex::new(SourceState {
                pending: handles.iter().cloned().collect(),
                ..SourceState::default()
            }),
            handles,
            cleanup_on_close: config.cleanup_on_close,
            buffered_bytes: AtomicU64::new(0),
        })
    }

    pub fn handles(&self) -> &[ExchangeSourceHandle] {
        &self.handles
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prefetch(&self, state: &mut SourceState) {
        let Some(next) = state.pending.pop_front() else {
            self.buffered_bytes.store(0, Ordering::Release);
            return;
        };
        match self.reader.fetch_page(&next) {
            Ok(page) => {
                self.buffered_bytes
                    .store(page.len() as u64, Ordering::Release);
                state.buffered = Some(page);
            }
            Err(e) => {
                // Surface the failure from the read that needs this page.
                debug!(handle = %next, error = %e, "spool prefetch failed");
                self.buffered_bytes.store(0, Ordering::Release);
                state.pending.push_front(next);
            }
        }
    }

    fn remove_spooled_files(&self) -> Result<()> {
        let mut first_err = None;
        for handle in &self.handles {
            let path = self.reader.root_dir().join(handle_path(handle));
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove spooled partition");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(SpoolError::Io(e)),
            None => Ok(()),
        }
    }
}

impl ExchangeSource for FileSystemExchangeSource {
    fn read(&self) -> Result<Option<Bytes>> {
        let mut state = self.state();
        if state.closed {
            return Ok(None);
        }
        let page = match state.buffered.take() {
            Some(page) => page,
            None => match state.pending.pop_front() {
                Some(handle) => match self.reader.fetch_page(&handle) {
                    Ok(page) => page,
                    Err(e) => {
                        state.pending.push_front(handle);
                        return Err(e);
                    }
                },
                None => {
                    self.buffered_bytes.store(0, Ordering::Release);
                    return Ok(None);
                }
            },
        };
        self.prefetch(&mut state);
        Ok(Some(page))
    }

    fn is_finished(&self) -> bool {
        let state = self.state();
        state.closed || (state.buffered.is_none() && state.pending.is_empty())
    }

    fn is_blocked(&self) -> BlockedFuture {
        // Local reads complete synchronously inside `read`.
        not_blocked()
    }

    fn memory_usage(&self) -> u64 {
        self.buffered_bytes.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.buffered = None;
            state.pending.clear();
            self.buffered_bytes.store(0, Ordering::Release);
        }
        if self.cleanup_on_close {
            self.remove_spooled_files()?;
        }
        Ok(())
    }
}

/// Build a [`SpoolingExchangeDataSource`] reading `handles` from the spool
/// directory configured in `config`.
pub fn open_spooling_data_source(
    config: &ExchangeConfig,
    handles: Vec<ExchangeSourceHandle>,
    memory: Arc<dyn LocalMemoryContext>,
) -> Result<SpoolingExchangeDataSource> {
    let source = FileSystemExchangeSource::new(config, handles.clone())?;
    Ok(SpoolingExchangeDataSource::new(
        Arc::new(source),
        handles,
        memory,
    ))
}
