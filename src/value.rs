//! Cell values produced by column extractors.
//!
//! Values are engine-local copies: once extracted they no longer borrow from
//! the monitoring core, so they can outlive the read guard of a query pass.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metric::MetricSamples;

/// Leads the rendering of a cell that could not be computed.
pub const UNAVAILABLE_PREFIX: &str = "ERROR: ";

/// A typed cell value.
///
/// # Examples
///
/// ```
/// use livequery::Value;
///
/// let state = Value::Int(2);
/// let output = Value::from("CRIT - load too high");
///
/// assert_eq!(state.as_f64(), Some(2.0));
/// assert_eq!(output.as_str(), Some("CRIT - load too high"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
    /// List of fixed-size records, e.g. `(description, state, has_been_checked)`.
    Tuples(Vec<Vec<Value>>),
    Time(DateTime<Utc>),
    Blob(Vec<u8>),
    Series(MetricSamples),
    /// No data for this cell.
    Null,
    /// The cell could not be computed (e.g. metric store down).
    Unavailable(String),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view used by comparisons and aggregation.
    ///
    /// Times are seconds since the epoch.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Time(t) => Some(t.timestamp() as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Tuples(_) => "tuples",
            Self::Time(_) => "time",
            Self::Blob(_) => "blob",
            Self::Series(_) => "series",
            Self::Null => "null",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::List(v) => write!(f, "{}", v.join(",")),
            Self::Tuples(v) => write!(f, "tuples[{}]", v.len()),
            Self::Time(v) => write!(f, "{}", v.timestamp()),
            Self::Blob(v) => write!(f, "blob[{}]", v.len()),
            Self::Series(v) => write!(f, "series[{}]", v.values.len()),
            Self::Null => Ok(()),
            Self::Unavailable(reason) => write!(f, "{UNAVAILABLE_PREFIX}{reason}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
