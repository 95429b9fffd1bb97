// src/firehose.rs

//! Server-sent event feeds of page-level changes.

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::BoxFuture;
use reqwest::header;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{no_cache, send};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::framing::{self, SseDecoder};
use crate::manager::{OnEvent, StreamOpener};

/// The page-level feeds the firehose exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    PageUpdate,
    PageDelete,
    PageVisibility,
}

impl Feed {
    pub fn path(self) -> &'static str {
        match self {
            Feed::PageUpdate => "page-update",
            Feed::PageDelete => "page-delete",
            Feed::PageVisibility => "page-visibility",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    access_token: String,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    pub fn with_http_client(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            base_url: config.firehose_url.clone(),
            user_agent: config.user_agent.clone(),
            access_token: String::new(),
        }
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
    }

    pub async fn page_update(
        &self,
        cancel: &CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'_>,
    ) -> Result<()> {
        self.subscribe(Feed::PageUpdate, cancel, since, on_event).await
    }

    pub async fn page_delete(
        &self,
        cancel: &CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'_>,
    ) -> Result<()> {
        self.subscribe(Feed::PageDelete, cancel, since, on_event).await
    }

    pub async fn page_visibility(
        &self,
        cancel: &CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'_>,
    ) -> Result<()> {
        self.subscribe(Feed::PageVisibility, cancel, since, on_event).await
    }

    /// Reads `feed` from `since` until the server closes it or `cancel` fires.
    pub async fn subscribe(
        &self,
        feed: Feed,
        cancel: &CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'_>,
    ) -> Result<()> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        debug!(feed = feed.path(), %since, "subscribing to firehose");

        let (name, value) = no_cache();
        let request = self
            .http
            .get(format!("{}/{}", self.base_url, feed.path()))
            .query(&[("since", since.as_str())])
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT, "text/event-stream")
            .header(name, value)
            .bearer_auth(&self.access_token);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            response = send(request) => response?,
        };

        let mut decoder = SseDecoder::new();
        framing::drive(framing::lines(response), cancel, |line| {
            if let Some(event) = decoder.push_line(&line)? {
                on_event(event);
            }
            Ok(())
        })
        .await
    }

    /// Binds `feed` to the [`StreamOpener`] capability for a connection manager.
    pub fn opener(&self, feed: Feed) -> FirehoseOpener {
        FirehoseOpener { client: self.clone(), feed }
    }
}

#[derive(Debug, Clone)]
pub struct FirehoseOpener {
    client: Client,
    feed: Feed,
}

impl StreamOpener for FirehoseOpener {
    fn open<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.client.subscribe(self.feed, cancel, since, on_event))
    }
}
