//! Framed JSON-RPC transport over a child process's stdio.
//!
//! Framing is line-delimited: one JSON value per line, UTF-8. The reader
//! task demultiplexes responses into a pending-request table keyed by the
//! per-transport request id; unknown ids are logged and dropped, parse
//! failures are logged and discarded (never fatal), and stderr is drained
//! into debug logs.
//!
//! Close-and-fail is atomic: the closed flag and the pending table live
//! under one lock, so a late response cannot resolve a request after the
//! transport shut down.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;

use crate::error::CallError;
use crate::protocol::{Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Hard deadline for a single upstream request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for MCP transports.
///
/// The bridge drives every upstream through this seam; tests substitute
/// in-memory implementations.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the correlated response.
    ///
    /// # Errors
    ///
    /// Returns a terminal [`CallError`] if the transport is closed or the
    /// process exited, and a transient one if the deadline elapsed.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, CallError>;

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// Returns a terminal [`CallError`] if the transport is closed.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallError>;

    /// Close the transport, failing all pending requests terminally.
    async fn close(&self);
}

/// Pending table plus the closed flag, guarded together.
struct TransportState {
    pending: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// Stdio transport for upstream MCP servers.
///
/// Spawns the child process and communicates via newline-delimited JSON-RPC
/// over its stdin/stdout. One logical reader per transport; transports are
/// never shared between upstreams.
pub struct StdioTransport {
    /// Upstream name, for log lines.
    name: String,
    /// Request ID counter; ids are allocated FIFO.
    next_id: AtomicU64,
    /// Pending requests awaiting responses.
    state: Arc<Mutex<TransportState>>,
    /// Writer to the child's stdin. `None` once closed.
    writer: Mutex<Option<BufWriter<ChildStdin>>>,
    /// Child process handle, kept for the kill on close.
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn an upstream server process.
    ///
    /// The child inherits the parent environment augmented with `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if `argv` is empty or the process fails to spawn.
    pub fn spawn(
        name: impl Into<String>,
        argv: &[String],
        env: &[(String, String)],
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let (program, args) = argv
            .split_first()
            .context("upstream launch command is empty")?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn upstream {name}: {program}"))?;

        let stdin = child
            .stdin
            .take()
            .with_context(|| format!("upstream {name}: no stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("upstream {name}: no stdout handle"))?;
        let stderr = child.stderr.take();

        let transport = Arc::new(Self {
            name: name.clone(),
            next_id: AtomicU64::new(1),
            state: Arc::new(Mutex::new(TransportState {
                pending: HashMap::new(),
                closed: false,
            })),
            writer: Mutex::new(Some(BufWriter::new(stdin))),
            child: Mutex::new(child),
        });

        // Reader task: one per transport, demuxes responses by id.
        let state = Arc::clone(&transport.state);
        let reader_name = name.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Frame>(trimmed) {
                            Ok(Frame::Response(response)) => {
                                deliver(&state, &reader_name, response).await;
                            }
                            Ok(Frame::Notification(note)) => {
                                debug!("[{reader_name}] notification: {}", note.method);
                            }
                            Ok(Frame::Request(request)) => {
                                debug!(
                                    "[{reader_name}] ignoring server-initiated request: {}",
                                    request.method
                                );
                            }
                            Err(e) => {
                                warn!("[{reader_name}] discarding unparseable frame: {e}");
                            }
                        }
                    }
                }
            }

            // EOF: the process exited. Fail everything still in flight.
            let mut state = state.lock().await;
            state.closed = true;
            let drained = state.pending.drain().count();
            if drained > 0 {
                warn!("[{reader_name}] process exited with {drained} request(s) in flight");
            } else {
                debug!("[{reader_name}] process exited");
            }
        });

        // Stderr is for logging only.
        if let Some(stderr) = stderr {
            let stderr_name = name;
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => debug!("[{stderr_name} stderr] {}", line.trim_end()),
                    }
                }
            });
        }

        Ok(transport)
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn write_line(&self, line: &str) -> Result<(), CallError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(CallError::terminal(format!(
                "upstream {} stdin is closed",
                self.name
            )));
        };

        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            CallError::terminal(format!(
                "failed to write to upstream {} stdin: {e}",
                self.name
            ))
        })
    }
}

/// Route a response to its pending request, if any.
async fn deliver(state: &Mutex<TransportState>, name: &str, response: JsonRpcResponse) {
    let RequestId::Number(id) = response.id else {
        warn!("[{name}] dropping response with non-numeric id {:?}", response.id);
        return;
    };

    let sender = state.lock().await.pending.remove(&id);
    match sender {
        Some(sender) => {
            let _ = sender.send(response);
        }
        None => warn!("[{name}] dropping response for unknown id {id}"),
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, CallError> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(method, params, id);

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(CallError::terminal(format!(
                    "upstream {} process exited",
                    self.name
                )));
            }
            state.pending.insert(id, tx);
        }

        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => {
                self.state.lock().await.pending.remove(&id);
                return Err(CallError::terminal(format!(
                    "failed to serialize request: {e}"
                )));
            }
        };

        if let Err(e) = self.write_line(&line).await {
            self.state.lock().await.pending.remove(&id);
            return Err(e);
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Sender dropped: the reader hit EOF and drained the table.
            Ok(Err(_)) => Err(CallError::terminal(format!(
                "upstream {} process exited",
                self.name
            ))),
            Err(_) => {
                self.state.lock().await.pending.remove(&id);
                Err(CallError::transient(format!(
                    "timeout waiting for upstream {} response to request {id} after {}s",
                    self.name,
                    REQUEST_TIMEOUT.as_secs()
                )))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallError> {
        if self.state.lock().await.closed {
            return Err(CallError::terminal(format!(
                "upstream {} process exited",
                self.name
            )));
        }
        let note = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&note)
            .map_err(|e| CallError::terminal(format!("failed to serialize notification: {e}")))?;
        self.write_line(&line).await
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders fails every pending request terminally.
            state.pending.clear();
        }

        // Closing stdin asks the child to exit; the kill is a backstop.
        self.writer.lock().await.take();
        if let Err(e) = self.child.lock().await.start_kill() {
            debug!("[{}] kill after close: {e}", self.name);
        }
        debug!("[{}] transport closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_allocation_is_fifo() {
        let next_id = AtomicU64::new(1);
        assert_eq!(next_id.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(next_id.fetch_add(1, Ordering::SeqCst), 2);
        assert_eq!(next_id.fetch_add(1, Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deliver_routes_by_id() {
        let state = Mutex::new(TransportState {
            pending: HashMap::new(),
            closed: false,
        });
        let (tx, rx) = oneshot::channel();
        state.lock().await.pending.insert(5, tx);

        deliver(
            &state,
            "test",
            JsonRpcResponse::success(RequestId::Number(5), serde_json::json!({"ok": true})),
        )
        .await;

        let response = rx.await.expect("response delivered");
        assert!(!response.is_error());
        assert!(state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_drops_unknown_id() {
        let state = Mutex::new(TransportState {
            pending: HashMap::new(),
            closed: false,
        });

        // Must not panic or insert anything.
        deliver(
            &state,
            "test",
            JsonRpcResponse::success(RequestId::Number(99), serde_json::json!(null)),
        )
        .await;
        assert!(state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_argv() {
        let result = StdioTransport::spawn("empty", &[], &[]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_round_trip_via_shell_responder() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            // Reads one line, answers request id 1 with a fixed result.
            r#"read line; printf '{"jsonrpc":"2.0","id":1,"result":{"pong":true}}\n'"#.to_string(),
        ];
        let transport = StdioTransport::spawn("echo", &argv, &[]).expect("spawn");

        let response = transport
            .request("ping", None)
            .await
            .expect("response within deadline");
        assert_eq!(response.result.expect("result")["pong"], true);
    }

    #[tokio::test]
    async fn test_request_after_exit_is_terminal() {
        let argv = vec!["true".to_string()];
        let transport = StdioTransport::spawn("dead", &argv, &[]).expect("spawn");

        // Give the process a moment to exit and the reader to observe EOF.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = transport.request("ping", None).await.expect_err("closed");
        assert!(!err.is_retriable());
        assert!(err.message.contains("exited") || err.message.contains("stdin"));
    }
}
