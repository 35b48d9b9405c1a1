//! Exchange data sources for reading spooled intermediate query data.
//!
//! Architecture role:
//! - defines the [`ExchangeSource`] reader capability consumed from spool
//!   implementations
//! - defines the [`ExchangeDataSource`] contract exposed to exchange operators
//! - provides [`SpoolingExchangeDataSource`], which binds one exchange source
//!   to a memory accounting context and makes teardown race-safe
//! - provides the pipeline-facing [`ExchangeOperator`]
//!
//! Key modules:
//! - [`source`]
//! - [`handle`]
//! - [`data_source`]
//! - [`spooling`]
//! - [`operator`]
//! - [`page`]

pub mod data_source;
pub mod handle;
pub mod operator;
pub mod page;
pub mod source;
pub mod spooling;

pub use data_source::{ExchangeDataSource, OperatorInfo};
pub use handle::{DirectExchangeInput, ExchangeInput, ExchangeSourceHandle, SpoolingExchangeInput};
pub use operator::{ExchangeOperator, ExchangeOperatorFactory, ExchangeOperatorStats};
pub use page::{decode_page, encode_page};
pub use source::{BlockedFuture, ExchangeSource, blocked_on, is_resolved, not_blocked};
pub use spooling::SpoolingExchangeDataSource;
