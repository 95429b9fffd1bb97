// src/models.rs

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DownloadConfig;

/// A half-open byte range `[start, end)` of a remote resource.
///
/// `data` is filled exactly once by the task that fetches the range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
    pub data: Option<Bytes>,
}

impl Chunk {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end, data: None }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of the `Range` header for this chunk. HTTP ranges are inclusive.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Splits `content_length` bytes into consecutive chunks in ascending order.
///
/// Resources below `min_chunk_size` become a single chunk. Otherwise every chunk is
/// `chunk_size` long except the last, which ends exactly at `content_length`.
pub fn partition(content_length: u64, config: &DownloadConfig) -> Vec<Chunk> {
    if content_length < config.min_chunk_size || content_length == 0 {
        return vec![Chunk::new(0, content_length)];
    }

    let size = config.chunk_size.max(1);
    let mut chunks = Vec::with_capacity(content_length.div_ceil(size) as usize);
    let mut start = 0;
    while start < content_length {
        let end = (start + size).min(content_length);
        chunks.push(Chunk::new(start, end));
        start = end;
    }
    chunks
}

/// One position record of a streamed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
    pub dt: DateTime<Utc>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub offset: i64,
}

/// A decoded unit of a push stream. The payload is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Vec<EventId>,
    pub data: serde_json::Value,
}

impl Event {
    /// Position a reconnect should resume from: the first id record's timestamp.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.id.first().map(|id| id.dt)
    }

    /// Decodes the payload into a concrete record type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB5: u64 = 5_242_880;

    fn config(min_chunk_size: u64, chunk_size: u64) -> DownloadConfig {
        DownloadConfig { min_chunk_size, chunk_size, concurrency: 4 }
    }

    fn ranges(chunks: &[Chunk]) -> Vec<(u64, u64)> {
        chunks.iter().map(|c| (c.start, c.end)).collect()
    }

    #[test]
    fn twelve_megabytes_make_three_chunks() {
        let chunks = partition(12_000_000, &config(MIB5, MIB5));
        assert_eq!(
            ranges(&chunks),
            vec![(0, 5_242_880), (5_242_880, 10_485_760), (10_485_760, 12_000_000)]
        );
    }

    #[test]
    fn small_resource_is_one_chunk() {
        let chunks = partition(1_000, &config(MIB5, 100));
        assert_eq!(ranges(&chunks), vec![(0, 1_000)]);

        let chunks = partition(0, &config(MIB5, 100));
        assert_eq!(ranges(&chunks), vec![(0, 0)]);
    }

    #[test]
    fn chunks_cover_the_resource_exactly_once() {
        for (length, size) in [(10_000, 1_000), (10_001, 1_000), (9_999, 3_333), (7, 7), (8, 3)] {
            let chunks = partition(length, &config(1, size));
            let mut next = 0;
            for chunk in &chunks {
                assert_eq!(chunk.start, next);
                assert!(chunk.end > chunk.start);
                next = chunk.end;
            }
            assert_eq!(next, length);

            let expected_last = if length % size == 0 { size } else { length % size };
            assert_eq!(chunks.last().unwrap().len(), expected_last);
        }
    }

    #[test]
    fn range_header_is_inclusive() {
        assert_eq!(Chunk::new(0, 5).range_header(), "bytes=0-4");
        assert_eq!(Chunk::new(5, 10).range_header(), "bytes=5-9");
    }

    #[test]
    fn cursor_uses_first_id() {
        let event: Event = serde_json::from_str(
            r#"{"id":[
                {"topic":"a","partition":0,"dt":"2022-07-24T13:03:10.431Z","timestamp":1658667790431,"offset":1},
                {"topic":"b","partition":1,"dt":"2022-07-25T00:00:00Z","timestamp":0,"offset":2}
            ],"data":{"name":"Earth"}}"#,
        )
        .unwrap();
        assert_eq!(event.cursor().unwrap().timestamp_millis(), 1_658_667_790_431);

        let empty = Event { id: vec![], data: serde_json::Value::Null };
        assert!(empty.cursor().is_none());
    }
}
