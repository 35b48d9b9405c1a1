//! Reader capability for one exchange's spooled data.

use std::future::Future;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use spool_common::Result;

/// Cloneable signal that resolves once a reader may make progress.
///
/// Several operator instances can wait on the same signal, so it is a
/// [`Shared`] future.
pub type BlockedFuture = Shared<BoxFuture<'static, ()>>;

/// An already-resolved [`BlockedFuture`].
pub fn not_blocked() -> BlockedFuture {
    futures::future::ready(()).boxed().shared()
}

/// Wrap any `'static` future as a [`BlockedFuture`].
pub fn blocked_on<F>(fut: F) -> BlockedFuture
where
    F: Future<Output = ()> + Send + 'static,
{
    fut.boxed().shared()
}

/// Returns `true` when `signal` has already resolved.
pub fn is_resolved(signal: &BlockedFuture) -> bool {
    signal.peek().is_some() || signal.clone().now_or_never().is_some()
}

/// Pluggable, possibly remote, reader of spooled exchange data.
///
/// Implementations are shared across threads and must tolerate calls after
/// [`ExchangeSource::close`] (returning no data).
pub trait ExchangeSource: Send + Sync {
    /// Next chunk of data, or `None` when nothing is available right now.
    fn read(&self) -> Result<Option<Bytes>>;

    /// `true` once every chunk has been returned.
    fn is_finished(&self) -> bool;

    /// Signal that resolves when `read` may return data.
    fn is_blocked(&self) -> BlockedFuture;

    /// Bytes currently retained by the source.
    fn memory_usage(&self) -> u64;

    /// Release the source's resources.
    fn close(&self) -> Result<()>;
}
