//! Error taxonomy for the ingestion pipeline.
//!
//! None of these are fatal to a run: the pipeline logs them, counts them in
//! the [`RunReport`](crate::pipeline::RunReport) and keeps going.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("no response from {url} within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("fetch task for {url} aborted: {reason}")]
    Aborted { url: String, reason: String },
}

impl FetchError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Aborted { .. } => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageParseError {
    #[error("page has no <h2> date heading")]
    MissingHeading,

    #[error("cannot read a date from heading {heading:?}")]
    BadHeadingDate { heading: String },

    #[error("page has no lecture table")]
    MissingTable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowParseError {
    #[error("row {row}: expected at least {expected} cells, found {found}")]
    TooFewCells {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row}: unparseable {field} time {value:?}")]
    BadTime {
        row: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("docent list could not be encoded: {0}")]
    Docents(#[from] serde_json::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        let s = |status| FetchError::Status { status, url: "u".into() };
        assert!(s(429).is_transient());
        assert!(s(503).is_transient());
        assert!(!s(404).is_transient());
        assert!(FetchError::Timeout { url: "u".into(), timeout: Duration::from_secs(1) }.is_transient());
    }
}
