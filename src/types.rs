//! Result envelope types shared across the bridge.
//!
//! Every meta-tool invocation resolves to a [`BridgeResult`]: either a data
//! payload or an [`ErrorBody`], always accompanied by [`ResultMeta`]. The
//! envelope is what the agent sees, serialized as the text content of the
//! JSON-RPC reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User-visible error codes carried in the result envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The operation does not exist in the registry.
    InvalidOperation,
    /// The registry entry is malformed or unroutable.
    MappingError,
    /// The upstream is disabled or failed to start.
    ServerUnavailable,
    /// The upstream call failed after retries.
    ExecutionError,
    /// The upstream call timed out after retries.
    TimeoutError,
    /// The agent's request failed schema validation.
    ValidationError,
    /// A bug inside the gateway.
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::MappingError => "MAPPING_ERROR",
            Self::ServerUnavailable => "SERVER_UNAVAILABLE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of a failed invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Metadata attached to every invocation outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    /// Upstream that handled (or would have handled) the call.
    pub server_name: String,
    /// Operation name as the agent spelled it.
    pub operation_name: String,
    /// Wall-clock duration; zero for cache hits.
    pub duration_ms: u64,
    /// Whether the body came from the response cache.
    pub cached: bool,
    /// `ceil(serialized_len / 4)`; zero for failures.
    pub tokens_estimate: u64,
}

impl ResultMeta {
    #[must_use]
    pub fn new(server_name: impl Into<String>, operation_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            operation_name: operation_name.into(),
            duration_ms: 0,
            cached: false,
            tokens_estimate: 0,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub const fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    #[must_use]
    pub const fn with_tokens(mut self, tokens_estimate: u64) -> Self {
        self.tokens_estimate = tokens_estimate;
        self
    }
}

/// Outcome of one meta-tool invocation.
///
/// Exactly one of `data` / `error` is populated, matching `success`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResultMeta,
}

impl BridgeResult {
    #[must_use]
    pub const fn ok(data: Value, metadata: ResultMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    #[must_use]
    pub fn fail(code: ErrorCode, message: impl Into<String>, metadata: ResultMeta) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                code,
                details: None,
            }),
            metadata,
        }
    }

    #[must_use]
    pub fn fail_with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: Value,
        metadata: ResultMeta,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                code,
                details: Some(details),
            }),
            metadata,
        }
    }

    /// Error code of a failed result, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_code_wire_form() {
        let json = serde_json::to_string(&ErrorCode::InvalidOperation).expect("serialize");
        assert_eq!(json, "\"INVALID_OPERATION\"");
        assert_eq!(ErrorCode::TimeoutError.as_str(), "TIMEOUT_ERROR");
    }

    #[test]
    fn test_envelope_camel_case() {
        let result = BridgeResult::ok(
            json!({"content": []}),
            ResultMeta::new("serena", "findSymbol")
                .with_duration(12)
                .with_tokens(3),
        );

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["success"], true);
        assert_eq!(json["metadata"]["serverName"], "serena");
        assert_eq!(json["metadata"]["operationName"], "findSymbol");
        assert_eq!(json["metadata"]["durationMs"], 12);
        assert_eq!(json["metadata"]["cached"], false);
        assert_eq!(json["metadata"]["tokensEstimate"], 3);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_envelope_has_error_only() {
        let result = BridgeResult::fail(
            ErrorCode::ServerUnavailable,
            "upstream serena is not running",
            ResultMeta::new("serena", "findSymbol"),
        );

        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error_code(), Some(ErrorCode::ServerUnavailable));

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["error"]["code"], "SERVER_UNAVAILABLE");
    }

    #[test]
    fn test_cached_meta() {
        let meta = ResultMeta::new("tavily", "search").cached();
        assert!(meta.cached);
        assert_eq!(meta.duration_ms, 0);
    }
}
