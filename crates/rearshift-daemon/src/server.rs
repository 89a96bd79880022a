use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{Request, RequestEnvelope, SharedStatus};
use crate::overlay::OverlaySignal;

/// Default Unix socket the daemon listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/data/local/tmp/rearshift/rearshiftd.sock";

// ---------------------------------------------------------------------------
// JSON-RPC types (newline-delimited JSON)
// ---------------------------------------------------------------------------

fn default_jsonrpc() -> String {
    "2.0".into()
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// Server-initiated push (no `id`). Overlay surfaces subscribe to these.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Method mapping
// ---------------------------------------------------------------------------

/// Map a method name and its params object onto an orchestrator request.
///
/// Methods share their names with the request variants, so the mapping
/// is just tagging the params with the method and deserializing.
fn request_from_method(method: &str, params: &serde_json::Value) -> Option<Request> {
    let mut value = match params {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        serde_json::Value::Null => serde_json::json!({}),
        _ => return None,
    };
    value["op"] = serde_json::Value::String(method.to_string());
    serde_json::from_value(value).ok()
}

/// Map an overlay signal onto a JSON-RPC push.
fn signal_to_push(signal: &OverlaySignal) -> JsonRpcNotification {
    let (method, params) = match signal {
        OverlaySignal::Interrupt(kind) => {
            ("overlay_interrupt", serde_json::json!({ "kind": kind }))
        }
        OverlaySignal::ResumeCharging => ("overlay_resume_charging", serde_json::json!({})),
        OverlaySignal::FinishCharging => ("overlay_finish_charging", serde_json::json!({})),
    };
    JsonRpcNotification {
        jsonrpc: "2.0".into(),
        method: method.into(),
        params,
    }
}

// ---------------------------------------------------------------------------
// ControlServer
// ---------------------------------------------------------------------------

/// Unix-socket server exposing the daemon API to local clients: the CLI
/// in one-shot mode, and the overlay surfaces that report lifecycle
/// events and subscribe to signals.
///
/// Protocol: newline-delimited JSON-RPC over Unix stream sockets.
///
/// Supported methods:
///   - `status`    -- current daemon status snapshot
///   - `subscribe` -- receive overlay signal push notifications
///   - any request variant by its snake_case name, e.g.
///     `switch_current_to_rear`, `show_charging`, `set_rear_dpi`
pub struct ControlServer {
    socket_path: PathBuf,
    status: SharedStatus,
    requests: mpsc::Sender<RequestEnvelope>,
    signals: broadcast::Sender<OverlaySignal>,
    cancel: CancellationToken,
}

impl ControlServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        status: SharedStatus,
        requests: mpsc::Sender<RequestEnvelope>,
        signals: broadcast::Sender<OverlaySignal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            status,
            requests,
            signals,
            cancel,
        }
    }

    /// Run the server: bind the listener and accept connections until
    /// cancelled or a fatal listener error occurs.
    pub async fn run(self) -> std::io::Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Clean up stale socket file from a previous run.
        cleanup_socket(&self.socket_path).await;

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(path = %self.socket_path.display(), "control server listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let status = Arc::clone(&self.status);
                            let requests = self.requests.clone();
                            let signal_rx = self.signals.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_client(stream, status, requests, signal_rx).await
                                {
                                    tracing::debug!(error = %e, "client handler finished with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("control server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        cleanup_socket(&self.socket_path).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

async fn handle_client(
    stream: UnixStream,
    status: SharedStatus,
    requests: mpsc::Sender<RequestEnvelope>,
    mut signal_rx: broadcast::Receiver<OverlaySignal>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    tracing::debug!("client connected");
    let mut subscribed = false;

    loop {
        tokio::select! {
            // --- incoming request from client ---
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(l)) => l,
                    Ok(None) => {
                        tracing::debug!("client disconnected (EOF)");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "read error, dropping client");
                        return Err(e);
                    }
                };

                let req: JsonRpcRequest = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        let resp = JsonRpcResponse {
                            jsonrpc: "2.0".into(),
                            id: None,
                            result: None,
                            error: Some(JsonRpcError {
                                code: -32700,
                                message: format!("parse error: {e}"),
                            }),
                        };
                        write_json(&mut writer, &resp).await?;
                        continue;
                    }
                };

                tracing::debug!(method = %req.method, id = ?req.id, "request received");

                match req.method.as_str() {
                    "status" => {
                        let snapshot = status.read().await.clone();
                        let resp = JsonRpcResponse {
                            jsonrpc: "2.0".into(),
                            id: req.id,
                            result: Some(serde_json::json!(snapshot)),
                            error: None,
                        };
                        write_json(&mut writer, &resp).await?;
                    }

                    "subscribe" => {
                        subscribed = true;
                        tracing::debug!("client subscribed to overlay signals");
                        let resp = JsonRpcResponse {
                            jsonrpc: "2.0".into(),
                            id: req.id,
                            result: Some(serde_json::json!({ "subscribed": true })),
                            error: None,
                        };
                        write_json(&mut writer, &resp).await?;
                    }

                    method => {
                        let resp = match request_from_method(method, &req.params) {
                            Some(request) => dispatch(&requests, request, req.id).await,
                            None => JsonRpcResponse {
                                jsonrpc: "2.0".into(),
                                id: req.id,
                                result: None,
                                error: Some(JsonRpcError {
                                    code: -32601,
                                    message: format!("method not found: {method}"),
                                }),
                            },
                        };
                        write_json(&mut writer, &resp).await?;
                    }
                }
            }

            // --- overlay signal push ---
            signal = signal_rx.recv() => {
                let signal = match signal {
                    Ok(s) => s,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "client lagged, dropped signals");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("signal channel closed, dropping client");
                        return Ok(());
                    }
                };
                if subscribed {
                    if let Err(e) = write_json(&mut writer, &signal_to_push(&signal)).await {
                        tracing::debug!(error = %e, "failed to push signal, dropping client");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Forward a request to the orchestrator and wait for its outcome.
async fn dispatch(
    requests: &mpsc::Sender<RequestEnvelope>,
    request: Request,
    id: Option<u64>,
) -> JsonRpcResponse {
    let (tx, rx) = oneshot::channel();
    let envelope = RequestEnvelope {
        request,
        reply: Some(tx),
    };
    let sent = requests.send(envelope).await;
    let outcome = match sent {
        Ok(()) => rx.await.ok(),
        Err(_) => None,
    };
    match outcome {
        Some(outcome) => JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id,
            result: Some(serde_json::json!(outcome)),
            error: None,
        },
        None => JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: -32000,
                message: "daemon is shutting down".into(),
            }),
        },
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serialize a value as a single JSON line terminated by `\n` and flush.
async fn write_json<T: Serialize>(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    value: &T,
) -> std::io::Result<()> {
    let mut buf = serde_json::to_vec(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Remove a stale socket file if it exists.
async fn cleanup_socket(path: &Path) {
    if path.exists() {
        tracing::info!(path = %path.display(), "removing stale socket");
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "failed to remove stale socket"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
