// src/schema.rs

//! Metadata types returned by the API. Article and page bodies are left to the caller.

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Response headers of a HEAD request against a downloadable resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Entity tag with surrounding quotes removed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accept_ranges: String,
}

impl Headers {
    pub fn from_header_map(map: &HeaderMap) -> Result<Self> {
        let text = |name: header::HeaderName| {
            map.get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        let last_modified = match map.get(header::LAST_MODIFIED).and_then(|v| v.to_str().ok()) {
            Some(value) if !value.is_empty() => Some(
                DateTime::parse_from_rfc2822(value)
                    .map_err(|_| Error::InvalidHeader {
                        name: "Last-Modified",
                        value: value.to_string(),
                    })?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        let content_length = match map.get(header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()) {
            Some(value) if !value.is_empty() => {
                Some(value.parse::<u64>().map_err(|_| Error::InvalidHeader {
                    name: "Content-Length",
                    value: value.to_string(),
                })?)
            }
            _ => None,
        };

        Ok(Self {
            content_length,
            etag: text(header::ETAG).trim_matches('"').to_string(),
            last_modified,
            content_type: text(header::CONTENT_TYPE),
            accept_ranges: text(header::ACCEPT_RANGES),
        })
    }
}

/// Field selection and filtering applied to metadata requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Only honored by the articles endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { field: field.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alternate_name: String,
    #[serde(default)]
    pub direction: String,
}

/// Change metadata attached to projects, namespaces and streamed articles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(default)]
    pub identifier: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    pub date_created: Option<DateTime<Utc>>,
    pub date_published: Option<DateTime<Utc>>,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub additional_type: String,
    pub date_modified: Option<DateTime<Utc>>,
    pub in_language: Option<Language>,
    pub size: Option<Size>,
    pub event: Option<EventMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alternate_name: String,
    #[serde(default)]
    pub identifier: i64,
    pub event: Option<EventMeta>,
}

/// Metadata of a downloadable archive: an hourly batch or a daily snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub version: String,
    pub date_modified: Option<DateTime<Utc>>,
    pub is_part_of: Option<Project>,
    pub in_language: Option<Language>,
    pub namespace: Option<Namespace>,
    pub size: Option<Size>,
}

pub type Batch = Archive;
pub type Snapshot = Archive;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn headers_are_parsed_and_etag_unquoted() {
        let mut map = HeaderMap::new();
        map.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12000000"));
        map.insert(header::ETAG, HeaderValue::from_static("\"abc123\""));
        map.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/gzip"));
        map.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        map.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_static("Tue, 15 Nov 1994 12:45:26 GMT"),
        );

        let headers = Headers::from_header_map(&map).unwrap();
        assert_eq!(headers.content_length, Some(12_000_000));
        assert_eq!(headers.etag, "abc123");
        assert_eq!(headers.content_type, "application/gzip");
        assert_eq!(headers.accept_ranges, "bytes");
        assert_eq!(
            headers.last_modified.unwrap().to_rfc3339(),
            "1994-11-15T12:45:26+00:00"
        );
    }

    #[test]
    fn malformed_content_length_is_an_error() {
        let mut map = HeaderMap::new();
        map.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert!(matches!(
            Headers::from_header_map(&map),
            Err(Error::InvalidHeader { name: "Content-Length", .. })
        ));
    }

    #[test]
    fn request_skips_empty_fields() {
        let request = Request {
            filters: vec![Filter::new("namespace.identifier", 0)],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"filters":[{"field":"namespace.identifier","value":0}]}"#
        );
    }
}
