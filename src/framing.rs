// src/framing.rs

//! Line framing for long-lived response bodies: server-sent events and NDJSON.

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::archive::MAX_RECORD_SIZE;
use crate::error::{Error, Result};
use crate::models::Event;

/// Splits a response body into lines of at most [`MAX_RECORD_SIZE`] bytes.
pub fn lines(
    response: reqwest::Response,
) -> impl Stream<Item = std::result::Result<String, LinesCodecError>> + Send + Unpin {
    let body = Box::pin(response.bytes_stream()).map(|chunk| chunk.map_err(std::io::Error::other));
    FramedRead::new(
        StreamReader::new(body),
        LinesCodec::new_with_max_length(MAX_RECORD_SIZE),
    )
}

/// Feeds every line to `on_line` until the body ends, `on_line` fails, or `cancel`
/// fires. Cancellation is not an error.
pub(crate) async fn drive<S, F>(mut lines: S, cancel: &CancellationToken, mut on_line: F) -> Result<()>
where
    S: Stream<Item = std::result::Result<String, LinesCodecError>> + Unpin,
    F: FnMut(String) -> Result<()>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            next = lines.next() => next,
        };
        match next {
            Some(line) => on_line(line.map_err(line_error)?)?,
            None => return Ok(()),
        }
    }
}

fn line_error(err: LinesCodecError) -> Error {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            Error::Decode(format!("line exceeds {MAX_RECORD_SIZE} bytes"))
        }
        LinesCodecError::Io(err) => Error::Io(err),
    }
}

/// Assembles `id:` and `data:` lines of a server-sent event stream into [`Event`]s.
///
/// Multiple `data:` lines of one event are joined with `\n`. The event is emitted
/// on the blank line that ends it; an event without data emits nothing.
#[derive(Debug, Default)]
pub struct SseDecoder {
    id: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one line, returning an event once the blank line ending it arrives.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Event>> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(id) = field(line, "id") {
            self.id = Some(id.to_string());
        } else if let Some(data) = field(line, "data") {
            match &mut self.data {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(data);
                }
                None => self.data = Some(data.to_string()),
            }
        }
        // comments, `event:`, `retry:` are ignored
        Ok(None)
    }

    fn dispatch(&mut self) -> Result<Option<Event>> {
        let raw_id = self.id.take();
        let Some(data) = self.data.take() else {
            return Ok(None);
        };
        let id = match raw_id {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
            _ => Vec::new(),
        };
        let data = serde_json::from_str(&data)?;
        Ok(Some(Event { id, data }))
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Decodes one NDJSON line. Blank lines (keep-alives) yield `None`.
pub fn decode_record<T: DeserializeOwned>(line: &str) -> Result<Option<T>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}
