// src/downloader.rs

use std::future::Future;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::models::{partition, Chunk};
use crate::schema::Headers;

/// A remote resource that can be probed for its size and read by byte range.
pub trait RangeSource: Send + Sync + 'static {
    /// Metadata-only request (HEAD) for `path`.
    fn probe(&self, path: &str) -> impl Future<Output = Result<Headers>> + Send;

    /// Fetches the bytes of `chunk` from `path`.
    fn fetch_range(&self, path: &str, chunk: &Chunk) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Downloads a resource into a seekable sink using bounded parallel range requests.
///
/// Chunks are written in the order their fetches complete. Ranges never overlap, so
/// the sink ends up byte-identical to the remote resource. On the first error the
/// remaining fetches are aborted and the sink is left partially written; retrying
/// the whole download from scratch is safe.
#[derive(Debug)]
pub struct ChunkedDownloader<S> {
    source: Arc<S>,
    config: DownloadConfig,
    downloaded: Arc<AtomicU64>,
    total_size: Arc<AtomicU64>,
}

impl<S: RangeSource> ChunkedDownloader<S> {
    pub fn new(source: Arc<S>, config: DownloadConfig) -> Self {
        Self {
            source,
            config,
            downloaded: Arc::new(AtomicU64::new(0)),
            total_size: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Probes `path`, then fetches and writes every chunk into `sink`.
    pub async fn download<W>(&self, path: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + AsyncSeek + Unpin + Send,
    {
        self.config.validate()?;

        let headers = self.source.probe(path).await.map_err(|source| Error::Probe {
            path: path.to_string(),
            source: Box::new(source),
        })?;
        let content_length = headers
            .content_length
            .ok_or_else(|| Error::MissingContentLength { path: path.to_string() })?;

        let chunks = partition(content_length, &self.config);
        let expected = chunks.len();
        self.total_size.store(content_length, Ordering::SeqCst);
        self.downloaded.store(0, Ordering::SeqCst);
        debug!(path, content_length, chunks = expected, "starting chunked download");

        // Fetches block on a full channel while holding their permit, so at most
        // `2 * concurrency` chunks are buffered in memory.
        let (tx, rx) = mpsc::channel::<Chunk>(self.config.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let path: Arc<str> = Arc::from(path);
        let mut fetches = JoinSet::new();

        for chunk in chunks {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let path = Arc::clone(&path);
            let tx = tx.clone();
            fetches.spawn(async move {
                // The semaphore is never closed.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok(());
                };
                let chunk = fetch_chunk(source.as_ref(), &path, chunk).await?;
                // A closed receiver means the writer already failed.
                let _ = tx.send(chunk).await;
                Ok::<(), Error>(())
            });
        }
        drop(tx);

        let fetch_all = async {
            while let Some(joined) = fetches.join_next().await {
                joined??;
            }
            Ok::<(), Error>(())
        };

        let result = tokio::try_join!(fetch_all, write_back(sink, rx, &self.downloaded, content_length));
        match result {
            Ok(((), written)) if written == expected => {
                info!(path = &*path, bytes = content_length, chunks = expected, "download complete");
                Ok(())
            }
            Ok(((), written)) => Err(Error::Incomplete { written, expected }),
            Err(err) => {
                warn!(path = &*path, error = %err, "download failed");
                Err(err)
            }
        }
    }

    /// Fraction of the current download written so far, if its size is known.
    pub fn progress(&self) -> Option<f32> {
        let total = self.total_size.load(Ordering::SeqCst);
        if total == 0 {
            return None;
        }
        let done = self.downloaded.load(Ordering::SeqCst);
        Some(done as f32 / total as f32)
    }
}

async fn fetch_chunk<S: RangeSource>(source: &S, path: &str, mut chunk: Chunk) -> Result<Chunk> {
    if chunk.is_empty() {
        chunk.data = Some(Bytes::new());
        return Ok(chunk);
    }

    debug!(path, start = chunk.start, end = chunk.end, "fetching chunk");
    let mut data = source
        .fetch_range(path, &chunk)
        .await
        .map_err(|source| Error::Fetch {
            start: chunk.start,
            end: chunk.end,
            source: Box::new(source),
        })?;

    let actual = data.len() as u64;
    if actual < chunk.len() {
        return Err(Error::ShortRange { start: chunk.start, end: chunk.end, actual });
    }
    data.truncate(chunk.len() as usize);
    chunk.data = Some(data);
    Ok(chunk)
}

/// Sole owner of the sink: drains fetched chunks in arrival order.
async fn write_back<W>(
    sink: &mut W,
    mut rx: mpsc::Receiver<Chunk>,
    downloaded: &AtomicU64,
    content_length: u64,
) -> Result<usize>
where
    W: AsyncWrite + AsyncSeek + Unpin + Send,
{
    let mut written = 0;
    while let Some(chunk) = rx.recv().await {
        let (start, end) = (chunk.start, chunk.end);
        let data = chunk.data.unwrap_or_default();
        let write = async {
            sink.seek(SeekFrom::Start(start)).await?;
            sink.write_all(&data).await
        };
        write.await.map_err(|source| Error::Write { start, end, source })?;

        downloaded.fetch_add(data.len() as u64, Ordering::SeqCst);
        written += 1;
    }
    sink.flush()
        .await
        .map_err(|source| Error::Write { start: 0, end: content_length, source })?;
    Ok(written)
}
