//! The meta-tool surface the agent sees.
//!
//! Exactly one tool per routed category plus the batch tool. Each category
//! tool's schema enumerates the registry's operation names as an enum; the
//! large per-operation schemas of the upstreams are hidden. Validation
//! failures never raise: they come back as an error result whose single
//! text item is the serialized envelope.

use log::debug;
use serde_json::{Value, json};

use crate::batch::BatchOperation;
use crate::dispatcher::Dispatcher;
use crate::protocol::{ContentItem, ToolCallResult, ToolDefinition};
use crate::registry::Category;
use crate::types::{BridgeResult, ErrorCode, ResultMeta};
use std::sync::Arc;

/// Validates agent requests and formats dispatch outcomes.
pub struct MetaToolSurface {
    dispatcher: Arc<Dispatcher>,
}

impl MetaToolSurface {
    #[must_use]
    pub const fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The advertised meta-tool schemas.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let registry = self.dispatcher.registry();
        let mut tools: Vec<ToolDefinition> = Category::routed()
            .into_iter()
            .map(|category| {
                let ops = registry.list_operations(category);
                ToolDefinition {
                    name: category.tool_name().to_string(),
                    description: Some(format!(
                        "Routes one of the following operations to the {} server: {}",
                        upstream_for(category),
                        ops.join(", ")
                    )),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "operation": {
                                "type": "string",
                                "enum": ops,
                            },
                            "params": {
                                "type": "object",
                                "description": "Parameters passed through to the upstream tool",
                            },
                        },
                        "required": ["operation"],
                    }),
                }
            })
            .collect();

        tools.push(ToolDefinition {
            name: Category::Batch.tool_name().to_string(),
            description: Some(
                "Executes many operations in parallel with bounded concurrency; \
                 results preserve input order"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "category": {"type": "string"},
                                "operation": {"type": "string"},
                                "params": {"type": "object"},
                            },
                            "required": ["category", "operation"],
                        },
                    },
                },
                "required": ["operations"],
            }),
        });

        tools
    }

    /// Validate and invoke one meta-tool call.
    pub async fn call_tool(&self, name: &str, args: Value) -> ToolCallResult {
        debug!("meta-tool call: {name}");

        let Some(category) = Category::from_tool_name(name) else {
            return validation_failure(
                name,
                format!("unknown tool '{name}'; this gateway advertises category meta-tools only"),
            );
        };

        if category == Category::Batch {
            return self.call_batch(args).await;
        }

        let Some(args) = args.as_object() else {
            return validation_failure(name, "arguments must be an object");
        };

        let operation = match args.get("operation") {
            Some(Value::String(op)) => op.clone(),
            Some(_) => return validation_failure(name, "'operation' must be a string"),
            None => return validation_failure(name, "missing required field 'operation'"),
        };

        let params = match args.get("params") {
            None => json!({}),
            Some(value @ Value::Object(_)) => value.clone(),
            Some(_) => return validation_failure(name, "'params' must be an object"),
        };

        let envelope = self.dispatcher.dispatch(category, &operation, params).await;
        to_tool_result(&envelope)
    }

    async fn call_batch(&self, args: Value) -> ToolCallResult {
        let tool = Category::Batch.tool_name();

        let Some(operations) = args.get("operations") else {
            return validation_failure(tool, "missing required field 'operations'");
        };
        let ops: Vec<BatchOperation> = match serde_json::from_value(operations.clone()) {
            Ok(ops) => ops,
            Err(e) => {
                return validation_failure(tool, format!("malformed 'operations' array: {e}"));
            }
        };

        let (results, summary) = self.dispatcher.dispatch_batch(ops).await;
        let meta = ResultMeta::new("gateway", tool)
            .with_duration(summary.duration_ms)
            .with_tokens(summary.tokens_estimate);
        let envelope = BridgeResult::ok(json!({ "results": results, "summary": summary }), meta);
        to_tool_result(&envelope)
    }
}

fn upstream_for(category: Category) -> &'static str {
    crate::registry::UpstreamName::all()
        .into_iter()
        .find(|u| u.category() == category)
        .map_or("gateway", |u| u.as_str())
}

/// Serialize an envelope into the single text item of the reply.
fn to_tool_result(envelope: &BridgeResult) -> ToolCallResult {
    let text = serde_json::to_string(envelope).map_or_else(
        |e| {
            format!(
                r#"{{"success":false,"error":{{"message":"failed to serialize envelope: {e}","code":"INTERNAL_ERROR"}}}}"#
            )
        },
        |text| text,
    );

    ToolCallResult {
        content: vec![ContentItem::text(text)],
        is_error: !envelope.success,
    }
}

fn validation_failure(tool: &str, message: impl Into<String>) -> ToolCallResult {
    let envelope = BridgeResult::fail(
        ErrorCode::ValidationError,
        message,
        ResultMeta::new("gateway", tool),
    );
    to_tool_result(&envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchExecutor;
    use crate::cache::{CacheConfig, ResponseCache};
    use crate::metrics::MetricsLog;
    use crate::retry::RetryConfig;
    use std::collections::HashMap;

    fn surface_without_upstreams() -> MetaToolSurface {
        let dispatcher = Dispatcher::new(
            HashMap::new(),
            Arc::new(ResponseCache::new(CacheConfig::default())),
            RetryConfig::no_retry(),
            BatchExecutor::new(4),
            Arc::new(MetricsLog::new(true)),
        );
        MetaToolSurface::new(Arc::new(dispatcher))
    }

    fn envelope_of(result: &ToolCallResult) -> BridgeResult {
        let ContentItem::Text { text } = &result.content[0] else {
            panic!("expected text content");
        };
        serde_json::from_str(text).expect("envelope json")
    }

    #[test]
    fn test_advertises_six_tools() {
        let surface = surface_without_upstreams();
        let tools = surface.list_tools();

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "code_operations",
                "documentation_lookup",
                "browser_testing",
                "web_research",
                "ui_components",
                "batch_operations",
            ]
        );
    }

    #[test]
    fn test_category_schema_enumerates_operations() {
        let surface = surface_without_upstreams();
        let tools = surface.list_tools();
        let code_ops = tools.iter().find(|t| t.name == "code_operations").expect("tool");

        let ops = code_ops.input_schema["properties"]["operation"]["enum"]
            .as_array()
            .expect("enum");
        assert!(ops.iter().any(|v| v == "findSymbol"));
        assert!(ops.iter().any(|v| v == "executeShell"));
        // The schema carries operation names only, not upstream schemas.
        assert!(code_ops.input_schema["properties"]["params"]["properties"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_validation_error() {
        let surface = surface_without_upstreams();
        let result = surface.call_tool("nope", json!({})).await;

        assert!(result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope.error_code(), Some(ErrorCode::ValidationError));
        assert!(
            envelope
                .error
                .expect("error body")
                .message
                .contains("unknown tool")
        );
    }

    #[tokio::test]
    async fn test_missing_operation_field() {
        let surface = surface_without_upstreams();
        let result = surface
            .call_tool("code_operations", json!({"params": {}}))
            .await;

        assert!(result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope.error_code(), Some(ErrorCode::ValidationError));
    }

    #[tokio::test]
    async fn test_non_object_params_rejected() {
        let surface = surface_without_upstreams();
        let result = surface
            .call_tool(
                "code_operations",
                json!({"operation": "findSymbol", "params": "oops"}),
            )
            .await;

        assert!(result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope.error_code(), Some(ErrorCode::ValidationError));
    }

    #[tokio::test]
    async fn test_routed_call_without_upstream_is_unavailable() {
        let surface = surface_without_upstreams();
        let result = surface
            .call_tool("code_operations", json!({"operation": "findSymbol"}))
            .await;

        assert!(result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope.error_code(), Some(ErrorCode::ServerUnavailable));
    }

    #[tokio::test]
    async fn test_batch_requires_operations() {
        let surface = surface_without_upstreams();
        let result = surface.call_tool("batch_operations", json!({})).await;

        assert!(result.is_error);
        let envelope = envelope_of(&result);
        assert_eq!(envelope.error_code(), Some(ErrorCode::ValidationError));
    }

    #[tokio::test]
    async fn test_batch_envelope_shape() {
        let surface = surface_without_upstreams();
        let result = surface
            .call_tool(
                "batch_operations",
                json!({"operations": [
                    {"category": "web_research", "operation": "search", "params": {"query": "x"}}
                ]}),
            )
            .await;

        // The batch itself settles even though its one op fails.
        assert!(!result.is_error);
        let envelope = envelope_of(&result);
        let data = envelope.data.expect("data");
        assert_eq!(data["results"].as_array().expect("results").len(), 1);
        assert_eq!(data["summary"]["total"], 1);
        assert_eq!(data["summary"]["failed"], 1);
    }
}
