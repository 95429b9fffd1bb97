// src/realtime.rs

//! Long-lived NDJSON feed of article changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{no_cache, send};
use crate::config::ClientConfig;
use crate::error::{BoxError, Error, Result};
use crate::framing::{self, decode_record};
use crate::manager::{OnEvent, StreamOpener};
use crate::models::{Event, EventId};
use crate::schema::{EventMeta, Filter};

/// Filters and starting positions for the articles stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticlesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Partition groups to connect to, as `[group, width]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<u32>,
    /// Offset to start from, per partition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub offsets: BTreeMap<u32, i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub since_per_partition: BTreeMap<u32, DateTime<Utc>>,
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
            base_url: config.realtime_url.clone(),
            user_agent: config.user_agent.clone(),
            access_token: String::new(),
        }
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Reads the articles stream, calling `callback` per record until the server
    /// closes the stream, the callback fails, or `cancel` fires.
    pub async fn articles<T, F, E>(
        &self,
        cancel: &CancellationToken,
        req: &ArticlesRequest,
        mut callback: F,
    ) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> std::result::Result<(), E>,
        E: Into<BoxError>,
    {
        debug!(since = ?req.since, filters = req.filters.len(), "subscribing to articles");
        let (name, value) = no_cache();
        let request = self
            .http
            .post(format!("{}/articles", self.base_url))
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT, "application/x-ndjson")
            .header(header::CONNECTION, "keep-alive")
            .header(name, value)
            .bearer_auth(&self.access_token)
            .json(req);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            response = send(request) => response?,
        };

        framing::drive(framing::lines(response), cancel, |line| {
            match decode_record::<T>(&line)? {
                Some(record) => callback(record).map_err(|e| Error::Callback(e.into())),
                None => Ok(()),
            }
        })
        .await
    }

    /// Binds the articles stream to the [`StreamOpener`] capability. Every reconnect
    /// replaces `request.since` with the connection's cursor.
    pub fn opener(&self, request: ArticlesRequest) -> ArticlesOpener {
        ArticlesOpener { client: self.clone(), request }
    }
}

#[derive(Debug, Clone)]
pub struct ArticlesOpener {
    client: Client,
    request: ArticlesRequest,
}

impl StreamOpener for ArticlesOpener {
    fn open<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        since: DateTime<Utc>,
        on_event: OnEvent<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let request = ArticlesRequest { since: Some(since), ..self.request.clone() };
            self.client
                .articles(cancel, &request, |record: serde_json::Value| {
                    on_event(article_event(record));
                    Ok::<_, BoxError>(())
                })
                .await
        })
    }
}

/// Wraps an article record as an [`Event`], taking its position from the
/// record's `event` metadata.
fn article_event(record: serde_json::Value) -> Event {
    let meta = record
        .get("event")
        .and_then(|event| EventMeta::deserialize(event).ok());
    let id = meta
        .and_then(|meta| {
            let dt = meta.date_published.or(meta.date_created)?;
            Some(EventId {
                topic: "articles".to_string(),
                partition: meta.partition.unwrap_or_default(),
                dt,
                timestamp: dt.timestamp_millis(),
                offset: meta.offset.unwrap_or_default(),
            })
        })
        .into_iter()
        .collect();
    Event { id, data: record }
}
