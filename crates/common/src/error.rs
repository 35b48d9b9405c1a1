use thiserror::Error;

/// Error taxonomy shared by the spool crates.
///
/// Classification guidance:
/// - [`SpoolError::InvalidConfig`]: configuration/environment contract violations
/// - [`SpoolError::IllegalState`]: caller/wiring bugs such as a precondition that did not hold
/// - [`SpoolError::Execution`]: runtime read, decode/encode, or data-shape failures
/// - [`SpoolError::Unsupported`]: valid request for a shape this crate does not handle
/// - [`SpoolError::Io`]: raw filesystem IO failures from std APIs
#[derive(Debug, Error)]
pub enum SpoolError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - zero fetch chunk size
    /// - unparsable `SPOOL_*` environment override
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A precondition on the call sequence did not hold.
    ///
    /// Examples:
    /// - an exchange input whose source handles differ from the ones the
    ///   data source was created with
    /// - a direct exchange input delivered to a spooling data source
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Runtime failures while reading or decoding spooled data.
    ///
    /// Examples:
    /// - IPC page decode failures
    /// - corrupt spool index
    /// - missing partition in an index
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature not implemented in this version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard spool result alias.
pub type Result<T> = std::result::Result<T, SpoolError>;
