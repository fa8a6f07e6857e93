//! Metric data model.
//!
//! A [`Metric`] is a single data point: a dotted path, a value and the
//! instant it was recorded. The value is a small sum type so callers can hand
//! over integers, floats or an already formatted decimal string and have each
//! rendered as its natural token on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer value, rendered in base 10.
    Int(i64),
    /// Unsigned integer value such as a counter, rendered in base 10.
    UInt(u64),
    /// Floating point value, rendered in shortest round-trip form.
    Float(f64),
    /// Pre-formatted token, rendered verbatim.
    Text(String),
}

impl Value {
    /// Numeric reading of the value.
    ///
    /// Returns `None` for text that does not parse as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        // usize is at most 64 bits on supported targets
        Value::UInt(v as u64)
    }
}

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// A single metric to be sent to a Graphite server.
///
/// All fields are required by the encoder except `value`, whose default
/// (`0`) is a legal reading. A `None` timestamp means "not provided".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metric {
    /// Namespace of the metric, without the client prefix
    pub path: String,
    /// Value of the metric
    pub value: Value,
    /// Time the metric was recorded
    pub timestamp: Option<DateTime<Utc>>,
}

impl Metric {
    /// Create a metric recorded at `timestamp`.
    pub fn new(path: impl Into<String>, value: impl Into<Value>, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            timestamp: Some(timestamp),
        }
    }

    /// Create a metric recorded now.
    pub fn now(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, value, Utc::now())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(
                f,
                "{} {} {}",
                self.path,
                self.value,
                ts.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            None => write!(f, "{} {} <unset>", self.path, self.value),
        }
    }
}
