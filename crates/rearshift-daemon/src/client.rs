use std::path::Path;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::orchestrator::{DaemonStatus, RequestOutcome};

/// Minimal client for the daemon JSON-RPC Unix socket API. One request
/// per call; the CLI opens a connection, asks, prints, exits.
pub struct ControlClient {
    stream: BufReader<UnixStream>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    #[allow(dead_code)]
    id: Option<u64>,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i32,
    message: String,
}

/// Parse a raw JSON-RPC response line into its result value.
///
/// Extracted from `ControlClient::call` so it can be unit-tested
/// without a live socket connection.
fn parse_response(line: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let resp: JsonRpcResponse = serde_json::from_str(line)?;
    if let Some(err) = resp.error {
        return Err(format!("daemon error: {}", err.message).into());
    }
    resp.result.ok_or_else(|| "missing result in response".into())
}

impl ControlClient {
    /// Connect to the daemon at the given Unix socket path.
    pub async fn connect(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Send one method call and return its raw result value.
    pub async fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let writer = self.stream.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut response = String::new();
        self.stream.read_line(&mut response).await?;
        parse_response(&response)
    }

    /// Fetch the daemon status snapshot.
    pub async fn status(&mut self) -> Result<DaemonStatus, Box<dyn std::error::Error>> {
        let value = self.call("status", serde_json::json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send an orchestrator request by method name and decode its outcome.
    pub async fn request(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<RequestOutcome, Box<dyn std::error::Error>> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}
