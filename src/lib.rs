pub mod api;
pub mod archive;
pub mod auth;
pub mod config;
pub mod downloader;
pub mod error;
pub mod firehose;
pub mod framing;
pub mod manager;
pub mod models;
pub mod ondemand;
pub mod realtime;
pub mod schema;

pub use error::{Error, Result};

/// Convenient re-exports of the types most callers need.
pub mod prelude {
    pub use crate::config::{ClientConfig, DownloadConfig, ReconnectPolicy};
    pub use crate::downloader::{ChunkedDownloader, RangeSource};
    pub use crate::error::{Error, Result};
    pub use crate::firehose::Feed;
    pub use crate::manager::{Connection, ConnectionManager, OnEvent, StreamOpener};
    pub use crate::models::{Chunk, Event, EventId};
    pub use crate::realtime::ArticlesRequest;
    pub use crate::schema::{Filter, Headers, Request};
    pub use tokio_util::sync::CancellationToken;
}
