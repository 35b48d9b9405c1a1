//! Shared configuration, error types, IDs, memory accounting and metrics for
//! the spool crates.
//!
//! Architecture role:
//! - defines exchange configuration passed to spool readers
//! - provides common [`SpoolError`] / [`Result`] contracts
//! - hosts per-operator memory accounting contexts
//! - hosts exchange metrics
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`memory`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod memory;
pub mod metrics;

pub use config::ExchangeConfig;
pub use error::{Result, SpoolError};
pub use ids::*;
pub use memory::{LocalMemoryContext, MemoryPool, SimpleLocalMemoryContext, TrackedMemoryContext};
pub use metrics::{ExchangeMetrics, PageMetrics, global_metrics};
