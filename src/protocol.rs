//! Graphite plaintext protocol encoder and decoder.
//!
//! One metric per line:
//!
//! ```text
//! <prefix><path> <value> <unix-seconds>\n
//! ```
//!
//! There is no framing beyond the trailing newline and no response from the
//! server.

use crate::metric::{Metric, Value};
use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use std::fmt::Write;
use std::str;

/// Field separator within a line
const SEPARATOR: u8 = b' ';

/// Reasons a metric cannot be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no path supplied")]
    EmptyPath,
    #[error("timestamp is not set")]
    MissingTimestamp,
    #[error("value could not be rendered")]
    Unrenderable,
}

/// Protocol decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Line did not split into path, value and timestamp
    #[error("invalid data: expected 3 fields, found {found} in {line:?}")]
    FieldCount { line: String, found: usize },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Append the protocol line for `metric` to `buf`.
///
/// `prefix` must already be normalized. Nothing is appended on error.
pub fn encode_into(metric: &Metric, prefix: &str, buf: &mut BytesMut) -> Result<(), ValidationError> {
    if metric.path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    let timestamp = metric.timestamp.ok_or(ValidationError::MissingTimestamp)?;

    let start = buf.len();
    if writeln!(
        buf,
        "{}{} {} {}",
        prefix,
        metric.path,
        metric.value,
        timestamp.timestamp()
    )
    .is_err()
    {
        buf.truncate(start);
        return Err(ValidationError::Unrenderable);
    }
    Ok(())
}

/// Encode a single metric into a fresh buffer.
pub fn encode(metric: &Metric, prefix: &str) -> Result<BytesMut, ValidationError> {
    let mut buf = BytesMut::new();
    encode_into(metric, prefix, &mut buf)?;
    Ok(buf)
}

/// Decode one protocol line back into a metric.
///
/// `line` excludes the trailing `\n`; a trailing `\r` is stripped. The value
/// is always decoded as a float.
pub fn decode_line(line: &[u8]) -> Result<Metric, DecodeError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = str::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8)?;

    let fields: Vec<&str> = line.split(SEPARATOR as char).collect();
    if fields.len() != 3 {
        return Err(DecodeError::FieldCount {
            line: line.to_string(),
            found: fields.len(),
        });
    }
    let (path, value, timestamp) = (fields[0], fields[1], fields[2]);

    let value: f64 = value
        .parse()
        .map_err(|_| DecodeError::InvalidValue(value.to_string()))?;

    let seconds: i64 = timestamp
        .parse()
        .map_err(|_| DecodeError::InvalidTimestamp(timestamp.to_string()))?;
    let timestamp = Utc
        .timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| DecodeError::InvalidTimestamp(seconds.to_string()))?;

    Ok(Metric {
        path: path.to_string(),
        value: Value::Float(value),
        timestamp: Some(timestamp),
    })
}
