//! Error types for livequery.
//!
//! All errors are strongly typed using thiserror. Parse-time failures carry the
//! offending request line, evaluation-time failures carry enough context to be
//! logged, and every error maps onto a protocol status code.

use thiserror::Error;

/// Status code for a successful response.
pub const STATUS_OK: u16 = 200;
/// Status code for malformed requests.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Status code for unknown tables or columns.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Status code for oversized requests.
pub const STATUS_TOO_LARGE: u16 = 413;
/// Status code for failures inside the engine.
pub const STATUS_INTERNAL: u16 = 500;

/// Protocol errors: the request cannot be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Empty request")]
    EmptyRequest,

    #[error("Invalid request line, expected 'GET <table>'")]
    InvalidRequestLine,

    #[error("Table '{name}' does not exist")]
    UnknownTable {
        name: String,
    },

    #[error("Table '{table}' has no column '{column}'")]
    UnknownColumn {
        table: String,
        column: String,
    },

    #[error("Unknown header '{keyword}'")]
    UnknownDirective {
        keyword: String,
    },

    #[error("Invalid argument for '{directive}': {reason}")]
    InvalidArgument {
        directive: String,
        reason: String,
    },

    #[error("'{directive}' needs {requested} entries on the stack, only {available} available")]
    StackUnderflow {
        directive: String,
        requested: usize,
        available: usize,
    },

    #[error("Request exceeds the limit of {limit} {unit}")]
    RequestTooLarge {
        limit: usize,
        unit: &'static str,
    },
}

/// A filter or stats literal is incompatible with the column it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeMismatchError {
    #[error("Invalid {expected} literal '{literal}' for column '{column}'")]
    InvalidLiteral {
        column: String,
        expected: &'static str,
        literal: String,
    },

    #[error("Operator '{operator}' is not supported on {column_type} column '{column}'")]
    UnsupportedOperator {
        column: String,
        column_type: &'static str,
        operator: String,
    },

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Cannot aggregate {column_type} column '{column}'")]
    NotAggregatable {
        column: String,
        column_type: &'static str,
    },

    #[error("Column '{column}' cannot be used in filters")]
    NotFilterable {
        column: String,
    },
}

/// Why a request line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
}

/// A request rejected at parse time, before any row is read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line_number}: {reason} (in '{line}')")]
pub struct ParseError {
    /// 1-based line number within the request block.
    pub line_number: usize,
    /// The offending line, verbatim.
    pub line: String,
    /// The reason the line was rejected.
    #[source]
    pub reason: RequestError,
}

impl ParseError {
    /// Creates a parse error for the given line.
    #[must_use]
    pub fn new(
        line_number: usize,
        line: impl Into<String>,
        reason: impl Into<RequestError>,
    ) -> Self {
        Self {
            line_number,
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Returns the protocol status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match &self.reason {
            RequestError::Protocol(
                ProtocolError::UnknownTable { .. } | ProtocolError::UnknownColumn { .. },
            ) => STATUS_NOT_FOUND,
            RequestError::Protocol(ProtocolError::RequestTooLarge { .. }) => STATUS_TOO_LARGE,
            _ => STATUS_BAD_REQUEST,
        }
    }

    /// Returns true if the line failed the column type check.
    #[must_use]
    pub const fn is_type_mismatch(&self) -> bool {
        matches!(self.reason, RequestError::TypeMismatch(_))
    }
}

/// Transient failures talking to the metric store.
///
/// These never abort a query: the affected cell is rendered as unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("No metric store configured")]
    NotConfigured,

    #[error("Metric store at {address} unreachable: {reason}")]
    Unreachable {
        address: String,
        reason: String,
    },

    #[error("Metric store did not answer within {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Malformed metric store reply: {reason}")]
    MalformedReply {
        reason: String,
    },
}

/// Top-level error type for livequery.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("Connection limit of {limit} reached")]
    ResourceExhausted {
        limit: usize,
    },

    #[error("Query cancelled: {reason}")]
    Cancelled {
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl LiveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns true if the request was rejected before execution.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns true if this is a transient metric store error.
    #[must_use]
    pub const fn is_metric(&self) -> bool {
        matches!(self, Self::Metric(_))
    }

    /// Returns true if the evaluation was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if the configuration was rejected.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the connection can keep serving requests after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Metric(_))
    }

    /// Returns the protocol status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Parse(e) => e.status_code(),
            _ => STATUS_INTERNAL,
        }
    }
}

impl From<config::ConfigError> for LiveError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

/// Result type alias for livequery operations.
pub type LiveResult<T> = Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_is_not_found() {
        let err = ParseError::new(
            2,
            "Columns: name bogus",
            ProtocolError::UnknownColumn {
                table: "hosts".to_string(),
                column: "bogus".to_string(),
            },
        );
        assert_eq!(err.status_code(), STATUS_NOT_FOUND);
        let msg = format!("{err}");
        assert!(msg.contains("line 2"));
        assert!(msg.contains("bogus"));
    }

    #[test]
    fn test_type_mismatch_is_bad_request() {
        let err = ParseError::new(
            3,
            "Filter: state = two",
            TypeMismatchError::InvalidLiteral {
                column: "state".to_string(),
                expected: "integer",
                literal: "two".to_string(),
            },
        );
        assert!(err.is_type_mismatch());
        assert_eq!(err.status_code(), STATUS_BAD_REQUEST);
        assert!(format!("{err}").contains("Invalid integer literal 'two'"));
    }

    #[test]
    fn test_request_too_large() {
        let err = ParseError::new(
            1,
            "GET hosts",
            ProtocolError::RequestTooLarge {
                limit: 1024,
                unit: "bytes",
            },
        );
        assert_eq!(err.status_code(), STATUS_TOO_LARGE);
    }

    #[test]
    fn test_metric_error_timeout() {
        let err = MetricError::Timeout { duration_ms: 5000 };
        assert!(format!("{err}").contains("5000ms"));
        let live: LiveError = err.into();
        assert!(live.is_metric());
        assert!(live.is_recoverable());
        assert_eq!(live.status_code(), STATUS_INTERNAL);
    }

    #[test]
    fn test_live_error_from_parse() {
        let err: LiveError = ParseError::new(1, "", ProtocolError::EmptyRequest).into();
        assert!(err.is_parse());
        assert!(err.is_recoverable());
        assert_eq!(err.status_code(), STATUS_BAD_REQUEST);
    }

    #[test]
    fn test_live_error_internal() {
        let err = LiveError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(!err.is_recoverable());
        assert!(format!("{err}").contains("unexpected state"));
    }

    #[test]
    fn test_cancelled_is_not_recoverable() {
        let err = LiveError::cancelled("client went away");
        assert!(err.is_cancelled());
        assert!(!err.is_recoverable());
    }
}
