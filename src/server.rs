//! Agent-facing JSON-RPC server over the gateway's own stdio.
//!
//! Newline-delimited frames, same dialect as the upstream side. Each
//! `tools/call` runs as its own task so a slow upstream never blocks the
//! read loop; replies are written under a shared writer lock. Parse
//! failures are answered with `-32700` when possible, unknown methods with
//! `-32601`.

use anyhow::Result;
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

use crate::protocol::{
    Frame, InitializeResult, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION, RequestId,
    ServerInfo, ToolCallParams, ToolsListResult, error_codes,
};
use crate::surface::MetaToolSurface;

/// Serve the meta-tool surface over this process's stdin/stdout until EOF.
///
/// # Errors
///
/// Returns an error if stdin cannot be read.
pub async fn serve(surface: Arc<MetaToolSurface>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let writer: Arc<Mutex<Stdout>> = Arc::new(Mutex::new(tokio::io::stdout()));

    info!("gateway serving on stdio");

    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Frame>(trimmed) {
            Ok(Frame::Request(request)) => {
                let surface = Arc::clone(&surface);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    let response = handle_request(&surface, request).await;
                    write_response(&*writer, &response).await;
                });
            }
            Ok(Frame::Notification(note)) => {
                debug!("agent notification: {}", note.method);
            }
            Ok(Frame::Response(response)) => {
                debug!("ignoring unexpected response frame for id {:?}", response.id);
            }
            Err(e) => {
                warn!("unparseable frame from agent: {e}");
                let response = JsonRpcResponse::failure(
                    RequestId::Null,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                );
                write_response(&*writer, &response).await;
            }
        }
    }

    info!("agent closed stdin, shutting down");
    Ok(())
}

/// Handle one request from the agent.
pub async fn handle_request(surface: &MetaToolSurface, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                capabilities: json!({"tools": {}}),
                server_info: ServerInfo {
                    name: "mcp-bridge".to_string(),
                    version: Some(env!("CARGO_PKG_VERSION").to_string()),
                },
            };
            match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => internal_error(id, e),
            }
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => {
            let result = ToolsListResult {
                tools: surface.list_tools(),
            };
            match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => internal_error(id, e),
            }
        }
        "tools/call" => {
            let params: ToolCallParams = match request
                .params
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(params)) => params,
                Ok(None) => {
                    return JsonRpcResponse::failure(
                        id,
                        error_codes::INVALID_PARAMS,
                        "tools/call requires params",
                    );
                }
                Err(e) => {
                    return JsonRpcResponse::failure(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid tools/call params: {e}"),
                    );
                }
            };

            let args = params.arguments.unwrap_or_else(|| json!({}));
            let result = surface.call_tool(&params.name, args).await;
            match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => internal_error(id, e),
            }
        }
        other => JsonRpcResponse::failure(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

fn internal_error(id: RequestId, e: serde_json::Error) -> JsonRpcResponse {
    JsonRpcResponse::failure(
        id,
        error_codes::INTERNAL_ERROR,
        format!("Internal error: {e}"),
    )
}

async fn write_response<W>(writer: &Mutex<W>, response: &JsonRpcResponse)
where
    W: AsyncWrite + Unpin,
{
    let line = match serde_json::to_string(response) {
        Ok(line) => line,
        Err(e) => {
            warn!("failed to serialize response: {e}");
            return;
        }
    };

    let mut writer = writer.lock().await;
    if let Err(e) = async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
    .await
    {
        warn!("failed to write response to agent: {e}");
    }
}
