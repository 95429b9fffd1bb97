// src/api.rs

use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use reqwest::header::{self, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

use crate::archive;
use crate::config::ClientConfig;
use crate::downloader::{ChunkedDownloader, RangeSource};
use crate::error::{BoxError, Error, Result};
use crate::models::Chunk;
use crate::schema::{Batch, Code, Headers, Language, Namespace, Project, Request, Snapshot};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Client for the v2 metadata, batch and snapshot endpoints.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    access_token: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_http_client(builder.build()?, config))
    }

    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config: Arc::new(config), access_token: String::new() }
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str, body: Option<&Request>) -> RequestBuilder {
        let url = format!("{}v2/{}", self.config.base_url, path);
        let builder = self
            .http
            .request(method, url)
            .header(header::USER_AGENT, &self.config.user_agent)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(&self.access_token);
        match body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }

    async fn get_entity<T: DeserializeOwned>(&self, path: &str, req: Option<&Request>) -> Result<T> {
        let response = send(self.request(Method::POST, path, req)).await?;
        Ok(response.json().await?)
    }

    async fn head_entity(&self, path: &str) -> Result<Headers> {
        let response = send(self.request(Method::HEAD, path, None)).await?;
        Headers::from_header_map(response.headers())
    }

    async fn read_entity<T, F, E>(&self, path: &str, callback: F) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        F: FnMut(T) -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let response = send(self.request(Method::GET, path, None)).await?;
        let body = Box::pin(response.bytes_stream()).map_err(std::io::Error::other);
        read_all(StreamReader::new(body), callback).await
    }

    pub async fn get_codes(&self, req: Option<&Request>) -> Result<Vec<Code>> {
        self.get_entity("codes", req).await
    }

    pub async fn get_code(&self, id: &str, req: Option<&Request>) -> Result<Code> {
        self.get_entity(&format!("codes/{id}"), req).await
    }

    pub async fn get_languages(&self, req: Option<&Request>) -> Result<Vec<Language>> {
        self.get_entity("languages", req).await
    }

    pub async fn get_language(&self, id: &str, req: Option<&Request>) -> Result<Language> {
        self.get_entity(&format!("languages/{id}"), req).await
    }

    pub async fn get_projects(&self, req: Option<&Request>) -> Result<Vec<Project>> {
        self.get_entity("projects", req).await
    }

    pub async fn get_project(&self, id: &str, req: Option<&Request>) -> Result<Project> {
        self.get_entity(&format!("projects/{id}"), req).await
    }

    pub async fn get_namespaces(&self, req: Option<&Request>) -> Result<Vec<Namespace>> {
        self.get_entity("namespaces", req).await
    }

    pub async fn get_namespace(&self, id: i64, req: Option<&Request>) -> Result<Namespace> {
        self.get_entity(&format!("namespaces/{id}"), req).await
    }

    /// Lists the hourly batches published on `date`.
    pub async fn get_batches(&self, date: NaiveDate, req: Option<&Request>) -> Result<Vec<Batch>> {
        self.get_entity(&format!("batches/{}", date.format(DATE_FORMAT)), req).await
    }

    pub async fn get_batch(&self, date: NaiveDate, id: &str, req: Option<&Request>) -> Result<Batch> {
        self.get_entity(&format!("batches/{}/{id}", date.format(DATE_FORMAT)), req).await
    }

    pub async fn head_batch(&self, date: NaiveDate, id: &str) -> Result<Headers> {
        self.head_entity(&batch_download_path(date, id)).await
    }

    /// Streams the batch archive and calls `callback` for every record in it.
    pub async fn read_batch<T, F, E>(&self, date: NaiveDate, id: &str, callback: F) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        F: FnMut(T) -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.read_entity(&batch_download_path(date, id), callback).await
    }

    /// Downloads the batch archive into `sink` with parallel range requests.
    pub async fn download_batch<W>(&self, date: NaiveDate, id: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + AsyncSeek + Unpin + Send,
    {
        self.downloader().download(&batch_download_path(date, id), sink).await
    }

    pub async fn get_snapshots(&self, req: Option<&Request>) -> Result<Vec<Snapshot>> {
        self.get_entity("snapshots", req).await
    }

    pub async fn get_snapshot(&self, id: &str, req: Option<&Request>) -> Result<Snapshot> {
        self.get_entity(&format!("snapshots/{id}"), req).await
    }

    pub async fn head_snapshot(&self, id: &str) -> Result<Headers> {
        self.head_entity(&snapshot_download_path(id)).await
    }

    pub async fn read_snapshot<T, F, E>(&self, id: &str, callback: F) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        F: FnMut(T) -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.read_entity(&snapshot_download_path(id), callback).await
    }

    pub async fn download_snapshot<W>(&self, id: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + AsyncSeek + Unpin + Send,
    {
        self.downloader().download(&snapshot_download_path(id), sink).await
    }

    /// Chunked downloader bound to this client's credentials and download settings.
    pub fn downloader(&self) -> ChunkedDownloader<Client> {
        ChunkedDownloader::new(Arc::new(self.clone()), self.config.download)
    }
}

impl RangeSource for Client {
    async fn probe(&self, path: &str) -> Result<Headers> {
        self.head_entity(path).await
    }

    async fn fetch_range(&self, path: &str, chunk: &Chunk) -> Result<Bytes> {
        let request = self
            .request(Method::GET, path, None)
            .header(header::RANGE, chunk.range_header());
        let response = send(request).await?;
        // A plain 200 carries the whole resource, which only matches the first chunk.
        if response.status() == StatusCode::OK && chunk.start != 0 {
            return Err(Error::Decode(format!(
                "server ignored range {} for {path}",
                chunk.range_header()
            )));
        }
        Ok(response.bytes().await?)
    }
}

/// Reads a local or remote `tar.gz` archive of records on a blocking thread.
pub async fn read_all<R, T, F, E>(reader: R, callback: F) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    T: DeserializeOwned + 'static,
    F: FnMut(T) -> std::result::Result<(), E> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let bridge = SyncIoBridge::new(reader);
    tokio::task::spawn_blocking(move || archive::read_all(bridge, callback)).await?
}

/// Sends the request and turns a non-2xx status into [`Error::Remote`].
pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(%status, body = %body, "request failed");
    Err(Error::remote(status, &body))
}

pub(crate) fn no_cache() -> (header::HeaderName, HeaderValue) {
    (header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
}

fn batch_download_path(date: NaiveDate, id: &str) -> String {
    format!("batches/{}/{id}/download", date.format(DATE_FORMAT))
}

fn snapshot_download_path(id: &str) -> String {
    format!("snapshots/{id}/download")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::tar_gz;
    use crate::config::DownloadConfig;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Client {
        let config = ClientConfig {
            base_url: format!("{}/", server.uri()),
            download: DownloadConfig { min_chunk_size: 1, chunk_size: 5, concurrency: 2 },
            ..Default::default()
        };
        let mut client = Client::new(config).unwrap();
        client.set_access_token("token");
        client
    }

    #[tokio::test]
    async fn metadata_requests_carry_token_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/projects"))
            .and(header_eq("Authorization", "Bearer token"))
            .and(body_json(serde_json::json!({"fields": ["identifier"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"identifier": "enwiki", "name": "Wikipedia"}
            ])))
            .mount(&server)
            .await;

        let request = Request { fields: vec!["identifier".into()], ..Default::default() };
        let projects = client(&server).get_projects(Some(&request)).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].identifier, "enwiki");
    }

    #[tokio::test]
    async fn error_body_becomes_the_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/codes/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_string("code not found"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/codes"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.get_code("nope", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Remote { status, ref message } if status == StatusCode::NOT_FOUND && message == "code not found"
        ));

        let err = client.get_codes(None).await.unwrap_err();
        assert_eq!(err.to_string(), "503 Service Unavailable: Service Unavailable");
    }

    #[tokio::test]
    async fn head_snapshot_parses_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/v2/snapshots/enwiki_namespace_0/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"d41d8cd9\"")
                    .insert_header("Accept-Ranges", "bytes")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        let headers = client(&server).head_snapshot("enwiki_namespace_0").await.unwrap();
        assert_eq!(headers.etag, "d41d8cd9");
        assert_eq!(headers.accept_ranges, "bytes");
        assert_eq!(headers.last_modified.unwrap().to_rfc3339(), "2015-10-21T07:28:00+00:00");
    }

    #[tokio::test]
    async fn fetch_range_sends_inclusive_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/snapshots/s/download"))
            .and(header_eq("Range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(206).set_body_string("World"))
            .mount(&server)
            .await;

        let bytes = client(&server)
            .fetch_range("snapshots/s/download", &Chunk::new(5, 10))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"World");
    }

    #[tokio::test]
    async fn ignored_range_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("HelloWorld"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_range("snapshots/s/download", &Chunk::new(5, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn failed_range_is_a_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_eq("Range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_range("snapshots/s/download", &Chunk::new(5, 10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Remote { status, ref message }
                if status == StatusCode::INTERNAL_SERVER_ERROR && message == "backend down"
        ));
    }

    #[tokio::test]
    async fn read_snapshot_streams_records() {
        let server = MockServer::start().await;
        let archive = tar_gz(&["{\"name\":\"Earth\"}\n{\"name\":\"Moon\"}\n"]);
        Mock::given(method("GET"))
            .and(path("/v2/snapshots/s/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        client(&server)
            .read_snapshot("s", move |record: serde_json::Value| {
                sink.lock().unwrap().push(record["name"].as_str().unwrap_or_default().to_string());
                Ok::<_, BoxError>(())
            })
            .await
            .unwrap();
        assert_eq!(*names.lock().unwrap(), ["Earth", "Moon"]);
    }

    #[tokio::test]
    async fn read_all_accepts_local_readers() {
        let archive = tar_gz(&["{\"name\":\"Mars\"}\n{\"name\":\"Venus\"}\n"]);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        read_all(Cursor::new(archive), move |_: serde_json::Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        })
        .await
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn batch_paths_use_the_date() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/batches/2024-01-31/enwiki_namespace_0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "identifier": "enwiki_namespace_0",
                "size": {"value": 12.5, "unit_text": "MB"}
            })))
            .mount(&server)
            .await;

        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let batch = client(&server).get_batch(date, "enwiki_namespace_0", None).await.unwrap();
        assert_eq!(batch.size.unwrap().unit_text, "MB");
    }
}
