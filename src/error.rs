// src/error.rs

use reqwest::StatusCode;
use thiserror::Error;

/// Boxed error returned by caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the clients, the chunked downloader and the stream readers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("probe of {path} failed: {source}")]
    Probe {
        path: String,
        #[source]
        source: Box<Error>,
    },
    #[error("probe of {path} returned no content length")]
    MissingContentLength { path: String },
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Remote { status: StatusCode, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to fetch chunk [{start}, {end}): {source}")]
    Fetch {
        start: u64,
        end: u64,
        #[source]
        source: Box<Error>,
    },
    #[error("chunk [{start}, {end}) returned {actual} bytes")]
    ShortRange { start: u64, end: u64, actual: u64 },
    #[error("failed to write chunk [{start}, {end}): {source}")]
    Write {
        start: u64,
        end: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("download incomplete: wrote {written} of {expected} chunks")]
    Incomplete { written: usize, expected: usize },
    #[error("callback aborted: {0}")]
    Callback(#[source] BoxError),
    #[error("invalid header {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("stream handler panicked: {0}")]
    Panicked(String),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Builds a `Remote` error from a non-success status and its (possibly empty) body.
    pub(crate) fn remote(status: StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            body.to_string()
        };
        Error::Remote { status, message }
    }

    /// True when the error came from a caller callback rather than the transport.
    pub fn is_callback(&self) -> bool {
        matches!(self, Error::Callback(_))
    }
}
