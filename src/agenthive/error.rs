//! Crate-wide error taxonomy.
//!
//! Every fallible surface in agenthive reports a [`HiveError`] carrying a
//! machine-readable [`ErrorKind`], a human-readable message, and an optional
//! source error. The kind decides behaviour at the boundaries: the HTTP layer
//! maps it to a status class, the agent engine decides whether to try a
//! fallback backend, and the plan/chain executors decide whether to abort.
//!
//! # Example
//!
//! ```rust
//! use agenthive::error::{ErrorKind, HiveError};
//!
//! let err = HiveError::new(ErrorKind::NotFound, "session abc123 not found");
//! assert_eq!(err.kind, ErrorKind::NotFound);
//! assert_eq!(err.http_status(), 404);
//! ```

use std::error::Error;
use std::fmt;

/// Classification of a failure, stable across the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: missing field, wrong type, out-of-range value.
    Validation,
    /// A referenced session, plan, delegation, or tool does not exist.
    NotFound,
    /// Policy refusal: path outside the project root, denied shell pattern,
    /// unauthorized scan target, or an upstream model refusal.
    Refused,
    /// Backend HTTP or socket failure. Eligible for the fallback chain.
    Transport,
    /// Backend responded but the body was not parseable. No fallback.
    Protocol,
    /// A per-call, per-tool, or per-step deadline elapsed.
    Timeout,
    /// The client cancelled the request.
    Cancelled,
    /// A streaming consumer fell too far behind and the stream was cut.
    Backpressure,
    /// An agent loop hit its iteration cap. Reported as success with a flag,
    /// never surfaced as an HTTP error.
    BudgetExhausted,
    /// Unexpected fault; logged with full detail, surfaced opaquely.
    Internal,
}

impl ErrorKind {
    /// Stable string form used in JSON error bodies and stream events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Refused => "refused",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::BudgetExhausted => "budget_exhausted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate error type.
#[derive(Debug)]
pub struct HiveError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable description, safe to surface to callers except for
    /// `Internal` (where the HTTP layer substitutes an opaque id).
    pub message: String,
    /// Optional underlying cause.
    pub cause: Option<Box<dyn Error + Send + Sync>>,
}

impl HiveError {
    /// Create an error with a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause (builder pattern).
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for a `Refused` error.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Refused, message)
    }

    /// Shorthand for a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Shorthand for a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Shorthand for a `Timeout` error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// HTTP status class this error surfaces as.
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Refused => 403,
            ErrorKind::Transport | ErrorKind::Protocol => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Cancelled
            | ErrorKind::Backpressure
            | ErrorKind::BudgetExhausted
            | ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for HiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for HiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn Error + 'static))
    }
}

impl From<std::io::Error> for HiveError {
    fn from(err: std::io::Error) -> Self {
        HiveError::internal(format!("io error: {}", err)).with_cause(err)
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(err: serde_json::Error) -> Self {
        HiveError::protocol(format!("json error: {}", err)).with_cause(err)
    }
}

impl From<reqwest::Error> for HiveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HiveError::timeout(format!("request timed out: {}", err)).with_cause(err)
        } else {
            HiveError::transport(format!("http error: {}", err)).with_cause(err)
        }
    }
}

/// Convenience alias used throughout the crate.
pub type HiveResult<T> = Result<T, HiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ErrorKind::Validation.as_str(), "validation");
        assert_eq!(ErrorKind::BudgetExhausted.as_str(), "budget_exhausted");
        assert_eq!(ErrorKind::Backpressure.as_str(), "backpressure");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(HiveError::validation("x").http_status(), 400);
        assert_eq!(HiveError::not_found("x").http_status(), 404);
        assert_eq!(HiveError::refused("x").http_status(), 403);
        assert_eq!(HiveError::transport("x").http_status(), 502);
        assert_eq!(HiveError::protocol("x").http_status(), 502);
        assert_eq!(HiveError::timeout("x").http_status(), 504);
        assert_eq!(HiveError::internal("x").http_status(), 500);
    }

    #[test]
    fn cause_is_chained() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = HiveError::internal("persist failed").with_cause(io);
        assert!(err.source().is_some());
        assert!(format!("{}", err).contains("persist failed"));
    }
}
