//! Upstream MCP client: one child process, one transport, one handshake.
//!
//! Lifecycle: `Spawned → Initialized → Ready → Closed`. No tool call is
//! accepted before `Ready`; after `Closed` every call fails terminally.
//! A dead upstream is not restarted.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::CallError;
use crate::protocol::{
    InitializeParams, InitializeResult, ClientInfo, ToolCallResult, ToolDefinition,
    MCP_PROTOCOL_VERSION, ToolCallParams, ToolsListResult,
};
use crate::registry::UpstreamName;
use crate::transport::{McpTransport, StdioTransport};

/// How to launch one upstream server. Immutable after construction.
#[derive(Clone, Debug)]
pub struct UpstreamDescriptor {
    /// Which upstream this is.
    pub name: UpstreamName,
    /// Launch command, pre-split into argv.
    pub argv: Vec<String>,
    /// Extra environment for the child; the parent's is inherited.
    pub env: Vec<(String, String)>,
    /// Settle time after the handshake, for servers that answer
    /// `initialize` before they can actually serve.
    pub warmup_delay: Option<Duration>,
}

impl UpstreamDescriptor {
    #[must_use]
    pub fn new(name: UpstreamName, argv: Vec<String>) -> Self {
        Self {
            name,
            argv,
            env: Vec::new(),
            warmup_delay: None,
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn with_warmup(mut self, delay: Duration) -> Self {
        self.warmup_delay = Some(delay);
        self
    }
}

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Process is up, handshake not yet done.
    Spawned,
    /// `initialize` exchanged, `initialized` notification sent.
    Initialized,
    /// Accepting tool calls.
    Ready,
    /// Disconnected; every call fails terminally.
    Closed,
}

/// Client for one upstream MCP server.
pub struct UpstreamClient {
    name: UpstreamName,
    transport: Arc<dyn McpTransport>,
    state: Mutex<ClientState>,
    server_info: Mutex<Option<InitializeResult>>,
}

impl UpstreamClient {
    /// Spawn the upstream described by `descriptor` and complete the
    /// handshake, leaving the client `Ready`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process fails to spawn or the handshake
    /// fails.
    pub async fn connect(descriptor: &UpstreamDescriptor) -> Result<Self> {
        let transport = StdioTransport::spawn(
            descriptor.name.as_str(),
            &descriptor.argv,
            &descriptor.env,
        )?;
        Self::handshake(descriptor.name, transport, descriptor.warmup_delay).await
    }

    /// Complete the handshake over an existing transport.
    ///
    /// Exposed so tests can drive the client over an in-memory transport.
    ///
    /// # Errors
    ///
    /// Returns an error if `initialize` fails or its result cannot be parsed.
    pub async fn handshake(
        name: UpstreamName,
        transport: Arc<dyn McpTransport>,
        warmup_delay: Option<Duration>,
    ) -> Result<Self> {
        let client = Self {
            name,
            transport,
            state: Mutex::new(ClientState::Spawned),
            server_info: Mutex::new(None),
        };

        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: "mcp-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let response = client
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await
            .map_err(|e| anyhow::anyhow!("initialize failed for {name}: {e}"))?;

        if let Some(error) = response.error {
            anyhow::bail!("upstream {name} rejected initialize: {}", error.message);
        }

        let result: InitializeResult = response
            .result
            .map(serde_json::from_value)
            .transpose()
            .context("failed to parse initialize response")?
            .context("initialize response missing result")?;

        info!(
            "[{name}] initialized: server={} protocol={} capabilities={}",
            result.server_info.name, result.protocol_version, result.capabilities
        );
        *client.server_info.lock().await = Some(result);
        *client.state.lock().await = ClientState::Initialized;

        client
            .transport
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| anyhow::anyhow!("initialized notification failed for {name}: {e}"))?;

        if let Some(delay) = warmup_delay {
            debug!("[{name}] warmup sleep {}ms", delay.as_millis());
            sleep(delay).await;
        }

        *client.state.lock().await = ClientState::Ready;
        Ok(client)
    }

    #[must_use]
    pub const fn name(&self) -> UpstreamName {
        self.name
    }

    pub async fn state(&self) -> ClientState {
        *self.state.lock().await
    }

    pub async fn is_ready(&self) -> bool {
        *self.state.lock().await == ClientState::Ready
    }

    /// What the upstream advertised during `initialize`.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Call a tool on the upstream.
    ///
    /// Blocks the caller until the correlated response arrives or the
    /// per-call deadline elapses.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] carrying the upstream failure; a result with
    /// `isError=true` is surfaced as an error too, classified by its text.
    pub async fn call_tool(&self, tool: &str, args: Value) -> Result<ToolCallResult, CallError> {
        self.ensure_ready().await?;

        let params = ToolCallParams {
            name: tool.to_string(),
            arguments: Some(args),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| CallError::terminal(format!("failed to serialize tool call: {e}")))?;

        let response = self.transport.request("tools/call", Some(params)).await?;

        if let Some(error) = response.error {
            let mut call_error = CallError::from_message(error.message);
            if let Some(data) = error.data {
                call_error = call_error.with_details(data);
            }
            return Err(call_error);
        }

        let result: ToolCallResult = response
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CallError::from_message(format!("failed to parse tool result: {e}")))?
            .ok_or_else(|| CallError::from_message("tool call response missing result"))?;

        if result.is_error {
            let text = result
                .content
                .iter()
                .find_map(|item| match item {
                    crate::protocol::ContentItem::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .unwrap_or("tool reported an error");
            return Err(CallError::from_message(text.to_string()));
        }

        Ok(result)
    }

    /// List the upstream's tools. Used for optional verification at startup.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the request fails.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, CallError> {
        self.ensure_ready().await?;

        let response = self.transport.request("tools/list", None).await?;
        if let Some(error) = response.error {
            return Err(CallError::from_message(error.message));
        }

        let result: ToolsListResult = response
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CallError::from_message(format!("failed to parse tools/list: {e}")))?
            .ok_or_else(|| CallError::from_message("tools/list response missing result"))?;

        Ok(result.tools)
    }

    /// Disconnect: signal the child to exit, fail all pending requests
    /// terminally, transition to `Closed`.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == ClientState::Closed {
                return;
            }
            *state = ClientState::Closed;
        }
        self.transport.close().await;
        info!("[{}] disconnected", self.name);
    }

    async fn ensure_ready(&self) -> Result<(), CallError> {
        let state = *self.state.lock().await;
        match state {
            ClientState::Ready => Ok(()),
            ClientState::Closed => Err(CallError::terminal(format!(
                "upstream {} is closed",
                self.name
            ))),
            ClientState::Spawned | ClientState::Initialized => {
                warn!("[{}] tool call before ready", self.name);
                Err(CallError::terminal(format!(
                    "upstream {} is still starting",
                    self.name
                )))
            }
        }
    }
}
