// src/config.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Settings shared by every client in the crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the main API, with a trailing slash.
    pub base_url: String,
    pub auth_url: String,
    pub realtime_url: String,
    pub firehose_url: String,
    pub ondemand_url: String,
    pub user_agent: String,
    /// Per-request timeout. Streaming requests ignore it.
    pub timeout: Option<Duration>,
    pub download: DownloadConfig,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.enterprise.wikimedia.com/".to_string(),
            auth_url: "https://auth.enterprise.wikimedia.com/v1".to_string(),
            realtime_url: "https://realtime.enterprise.wikimedia.com/v2".to_string(),
            firehose_url: "https://firehose.enterprise.wikimedia.com/v1".to_string(),
            ondemand_url: "https://api.enterprise.wikimedia.com/v1".to_string(),
            user_agent: concat!("wme-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: None,
            download: DownloadConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Chunking and parallelism for archive downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Resources smaller than this are fetched as a single chunk.
    pub min_chunk_size: u64,
    pub chunk_size: u64,
    /// Maximum number of ranged fetches in flight.
    pub concurrency: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 5_242_880,
            chunk_size: 5_242_880 * 5,
            concurrency: 10,
        }
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig("concurrency must be positive".into()));
        }
        Ok(())
    }
}

/// How a stream supervisor waits between connection attempts.
///
/// The default reconnects immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url":"http://localhost/","download":{"concurrency":2}}"#)
                .unwrap();
        assert_eq!(config.base_url, "http://localhost/");
        assert_eq!(config.download.concurrency, 2);
        assert_eq!(config.download.chunk_size, 26_214_400);
        assert_eq!(config.reconnect.delay, Duration::ZERO);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = DownloadConfig { chunk_size: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = DownloadConfig { concurrency: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
