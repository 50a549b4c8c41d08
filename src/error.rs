//! Upstream call errors and the retriability classifier.
//!
//! Every failure that crosses the retry boundary is a [`CallError`]: a
//! message plus a [`FailureKind`]. Transport-level failures (timeouts,
//! process exits) are constructed with an explicit kind; errors that bubble
//! up from upstream tools arrive unclassified and are judged by the
//! substring classifier in [`CallError::is_retriable`].

use serde_json::Value;

/// Message fragments that mark an error as permanently failed.
const NON_RETRIABLE_MARKERS: &[&str] = &[
    "invalid",
    "not found",
    "unauthorized",
    "forbidden",
    "bad request",
    "validation",
    "parse error",
];

/// Message fragments that mark an error as transient.
const RETRIABLE_MARKERS: &[&str] = &[
    "timeout",
    "econnrefused",
    "econnreset",
    "etimedout",
    "network",
    "temporary",
];

/// How a failure should be treated by the retry executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Never retried: process exit, closed stdin, client shut down.
    Terminal,
    /// Always retried (within the attempt budget): timeouts and the like.
    Transient,
    /// Classified by message content at retry time.
    Unclassified,
}

/// Error from an upstream call.
#[derive(Clone, Debug)]
pub struct CallError {
    /// Human-readable failure description.
    pub message: String,
    /// Retriability, if the producer knew it.
    pub kind: FailureKind,
    /// Structured detail from a JSON-RPC error object, when present.
    pub details: Option<Value>,
}

impl CallError {
    /// A failure that must not be retried.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Terminal,
            details: None,
        }
    }

    /// A failure known to be transient.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Transient,
            details: None,
        }
    }

    /// A failure whose retriability is decided by its message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Unclassified,
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Decide whether another attempt is worthwhile.
    ///
    /// Explicit kinds win. Unclassified errors are matched against the
    /// non-retriable marker list first, then the retriable list; anything
    /// matching neither is treated as retriable, since transient upstream
    /// trouble is the common case.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self.kind {
            FailureKind::Terminal => false,
            FailureKind::Transient => true,
            FailureKind::Unclassified => {
                let lowered = self.message.to_lowercase();
                if NON_RETRIABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
                    return false;
                }
                if RETRIABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
                    return true;
                }
                true
            }
        }
    }

    /// True when the message reads as a timeout, regardless of kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        let lowered = self.message.to_lowercase();
        lowered.contains("timeout") || lowered.contains("timed out")
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_kinds_override_message() {
        assert!(!CallError::terminal("network glitch").is_retriable());
        assert!(CallError::transient("invalid frame").is_retriable());
    }

    #[test]
    fn test_non_retriable_markers() {
        for msg in [
            "Invalid request payload",
            "symbol not found",
            "Unauthorized",
            "403 Forbidden",
            "Bad Request",
            "validation failed for field x",
            "Parse error at line 3",
        ] {
            assert!(
                !CallError::from_message(msg).is_retriable(),
                "expected non-retriable: {msg}"
            );
        }
    }

    #[test]
    fn test_retriable_markers() {
        for msg in [
            "timeout waiting for response",
            "connect ECONNREFUSED 127.0.0.1:3000",
            "read ECONNRESET",
            "ETIMEDOUT",
            "network unreachable",
            "temporary failure in name resolution",
        ] {
            assert!(
                CallError::from_message(msg).is_retriable(),
                "expected retriable: {msg}"
            );
        }
    }

    #[test]
    fn test_unmatched_defaults_to_retriable() {
        assert!(CallError::from_message("something odd happened").is_retriable());
    }

    #[test]
    fn test_non_retriable_wins_over_retriable() {
        // "invalid" appears alongside "timeout"; the permanent marker wins.
        assert!(!CallError::from_message("invalid timeout configuration").is_retriable());
    }

    #[test]
    fn test_is_timeout() {
        assert!(CallError::transient("timeout after 30s").is_timeout());
        assert!(CallError::from_message("request timed out").is_timeout());
        assert!(!CallError::from_message("connection refused").is_timeout());
    }
}
