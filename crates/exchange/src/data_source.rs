use bytes::Bytes;
use serde::{Deserialize, Serialize};
use spool_common::Result;

use crate::handle::ExchangeInput;
use crate::source::BlockedFuture;

/// Extended statistics an exchange data source may surface to its operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub buffered_bytes: u64,
    pub pages_received: u64,
    pub inputs_received: u64,
}

/// Data source shared by all exchange operator instances of one pipeline.
///
/// Every method may be called from several threads at once, including
/// [`ExchangeDataSource::close`] racing with in-flight polls.
pub trait ExchangeDataSource: Send + Sync {
    /// Next serialized page, or `None` if nothing is available right now.
    fn poll_page(&self) -> Result<Option<Bytes>>;

    fn is_finished(&self) -> bool;

    /// Signal to wait on before polling again.
    fn is_blocked(&self) -> BlockedFuture;

    /// Deliver an input. The driver may deliver the same input once per
    /// operator instance.
    fn add_input(&self, input: &ExchangeInput) -> Result<()>;

    fn no_more_inputs(&self);

    fn info(&self) -> Option<OperatorInfo>;

    /// Release the data source. Idempotent and infallible.
    fn close(&self);
}
