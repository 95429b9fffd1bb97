// src/archive.rs

use std::io::{BufRead, BufReader, Read};

use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;

use crate::error::{BoxError, Error, Result};

/// Largest single record accepted from an archive.
pub const MAX_RECORD_SIZE: usize = 20_971_520;

/// Reads a `tar.gz` archive of newline-delimited JSON and hands every record to
/// `callback`.
///
/// An error returned by the callback stops the read and is surfaced as
/// [`Error::Callback`]; use it to exit early.
pub fn read_all<R, T, F, E>(reader: R, mut callback: F) -> Result<()>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut(T) -> std::result::Result<(), E>,
    E: Into<BoxError>,
{
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let entries = archive.entries().map_err(decode_error)?;

    for entry in entries {
        let entry = entry.map_err(decode_error)?;
        let mut lines = BufReader::new(entry);
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = (&mut lines)
                .take(MAX_RECORD_SIZE as u64 + 1)
                .read_until(b'\n', &mut line)
                .map_err(decode_error)?;
            if read == 0 {
                break;
            }
            if line.len() > MAX_RECORD_SIZE {
                return Err(Error::Decode(format!(
                    "record exceeds {MAX_RECORD_SIZE} bytes"
                )));
            }

            let record = trim_line(&line);
            if record.is_empty() {
                continue;
            }
            let value: T = serde_json::from_slice(record)?;
            callback(value).map_err(|e| Error::Callback(e.into()))?;
        }
    }

    Ok(())
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn decode_error(err: std::io::Error) -> Error {
    Error::Decode(err.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Article {
        name: String,
        identifier: u64,
    }

    /// Builds a `tar.gz` with one entry per element of `files`.
    pub(crate) fn tar_gz(files: &[&str]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (i, contents) in files.iter().enumerate() {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("part_{i}.ndjson"), contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn reads_every_record_of_every_entry() {
        let archive = tar_gz(&[
            "{\"name\":\"Earth\",\"identifier\":1}\n{\"name\":\"Moon\",\"identifier\":2}\n",
            "{\"name\":\"Mars\",\"identifier\":3}\r\n\n",
        ]);

        let mut names = Vec::new();
        read_all(archive.as_slice(), |article: Article| {
            names.push(article.name);
            Ok::<_, BoxError>(())
        })
        .unwrap();
        assert_eq!(names, ["Earth", "Moon", "Mars"]);
    }

    #[test]
    fn callback_error_stops_reading() {
        let archive = tar_gz(&[
            "{\"name\":\"a\",\"identifier\":1}\n{\"name\":\"b\",\"identifier\":2}\n{\"name\":\"c\",\"identifier\":3}\n",
        ]);

        let mut seen = 0;
        let err = read_all(archive.as_slice(), |_: Article| {
            seen += 1;
            if seen == 2 {
                return Err("enough".into());
            }
            Ok::<_, BoxError>(())
        })
        .unwrap_err();

        assert!(err.is_callback());
        assert_eq!(seen, 2);
    }

    #[test]
    fn malformed_record_is_a_json_error() {
        let archive = tar_gz(&["{\"name\":\n"]);
        let err = read_all(archive.as_slice(), |_: Article| Ok::<_, BoxError>(())).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn non_gzip_input_is_a_decode_error() {
        let err = read_all(&b"plain text"[..], |_: Article| Ok::<_, BoxError>(())).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
