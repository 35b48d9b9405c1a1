use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolError};

pub const SPOOL_DIR_ENV: &str = "SPOOL_DIR";
pub const SPOOL_FETCH_CHUNK_BYTES_ENV: &str = "SPOOL_FETCH_CHUNK_BYTES";
pub const SPOOL_CLEANUP_ON_CLOSE_ENV: &str = "SPOOL_CLEANUP_ON_CLOSE";

/// Settings for reading spooled exchange data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Root directory holding `spool/...` partition files.
    pub spool_dir: String,
    /// Size of the byte chunks a partition is streamed in.
    pub fetch_chunk_bytes: usize,
    /// Remove spooled partition files once the reading source is closed.
    pub cleanup_on_close: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            spool_dir: ".spool".to_string(),
            fetch_chunk_bytes: 64 * 1024,
            cleanup_on_close: false,
        }
    }
}

impl ExchangeConfig {
    /// Defaults overlaid with `SPOOL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values produced by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(dir) = lookup(SPOOL_DIR_ENV) {
            cfg.spool_dir = dir;
        }
        if let Some(raw) = lookup(SPOOL_FETCH_CHUNK_BYTES_ENV) {
            cfg.fetch_chunk_bytes = parse_var(SPOOL_FETCH_CHUNK_BYTES_ENV, &raw)?;
        }
        if let Some(raw) = lookup(SPOOL_CLEANUP_ON_CLOSE_ENV) {
            cfg.cleanup_on_close = parse_var(SPOOL_CLEANUP_ON_CLOSE_ENV, &raw)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spool_dir.trim().is_empty() {
            return Err(SpoolError::InvalidConfig(
                "spool_dir must not be empty".to_string(),
            ));
        }
        if self.fetch_chunk_bytes == 0 {
            return Err(SpoolError::InvalidConfig(
                "fetch_chunk_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| SpoolError::InvalidConfig(format!("{key}={raw:?}: {e}")))
}
