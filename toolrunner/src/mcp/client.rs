//! Component H: one JSON-RPC-over-pipe session to an external tool-server.
//!
//! Hand-rolled directly against [`toolrunner_process`]'s pipe primitives
//! rather than a higher-level SDK — the testable properties (banner
//! tolerance, strictly increasing ids, a serialising request/response lock,
//! EOF surfacing) are properties of this wire layer itself.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::RuntimeError;
use crate::model::{CallResult, ExternalToolSchema};

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

struct Channel {
    output_rx: broadcast::Receiver<toolrunner_process::OutputChunk>,
    assembler: LineAssembler,
}

impl Channel {
    /// Scan for the next `{`-prefixed, JSON-parseable line on the server's
    /// output stream, silently skipping banner/log noise. `None` means the
    /// stream ended without one.
    async fn next_json_line(&mut self) -> Option<Value> {
        loop {
            match self.output_rx.recv().await {
                Ok(chunk) if !chunk.is_error => {
                    for line in self.assembler.feed(&chunk.bytes) {
                        if !line.starts_with('{') {
                            continue;
                        }
                        match serde_json::from_str::<Value>(&line) {
                            Ok(value) => return Some(value),
                            Err(e) => warn!(error = %e, "skipping malformed JSON-RPC line"),
                        }
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct OwnedProcess {
    handle: toolrunner_process::ProcessHandle,
    exit_rx: Mutex<Option<oneshot::Receiver<i32>>>,
}

/// One JSON-RPC-over-pipe session. Either owns a spawned child process or
/// wraps a pair of pre-existing streams (used by tests as a fake server).
pub struct McpClient {
    writer_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    channel: Mutex<Channel>,
    next_id: AtomicI64,
    closed: std::sync::atomic::AtomicBool,
    process: Option<OwnedProcess>,
}

impl McpClient {
    /// Spawn `command` as a child process and speak the wire protocol over
    /// its stdio. `env` replaces the child's environment entirely; callers
    /// must pre-merge the host environment themselves.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: HashMap<String, String>,
    ) -> Result<Self, RuntimeError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
        let spawned = toolrunner_process::spawn_process(command, args, &cwd, &env, &None)
            .await
            .map_err(|e| RuntimeError::Runtime(format!("failed to start external tool-server: {e}")))?;

        Ok(Self {
            writer_tx: Mutex::new(Some(spawned.session.writer_sender())),
            channel: Mutex::new(Channel {
                output_rx: spawned.output_rx,
                assembler: LineAssembler::default(),
            }),
            next_id: AtomicI64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            process: Some(OwnedProcess {
                handle: spawned.session,
                exit_rx: Mutex::new(Some(spawned.exit_rx)),
            }),
        })
    }

    /// Wrap a pair of pre-existing streams (e.g. an in-memory duplex pipe
    /// driving a fake server task) instead of spawning a process.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (output_tx, output_rx) = broadcast::channel(256);
        tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = vec![0u8; 8_192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = output_tx.send(toolrunner_process::OutputChunk {
                            bytes: buf[..n].to_vec(),
                            is_error: false,
                        });
                    }
                }
            }
        });

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(bytes) = writer_rx.recv().await {
                if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
                    break;
                }
            }
        });

        Self {
            writer_tx: Mutex::new(Some(writer_tx)),
            channel: Mutex::new(Channel {
                output_rx,
                assembler: LineAssembler::default(),
            }),
            next_id: AtomicI64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            process: None,
        }
    }

    fn check_closed(&self) -> Result<(), RuntimeError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RuntimeError::Closed)
        } else {
            Ok(())
        }
    }

    async fn write_line(&self, line: String) -> Result<(), RuntimeError> {
        let guard = self.writer_tx.lock().await;
        let tx = guard.as_ref().ok_or(RuntimeError::Closed)?;
        tx.send(format!("{line}\n").into_bytes())
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    /// Send a request, holding the call lock across both the write and the
    /// matching read so id correlation never needs a routing table.
    async fn send_request(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        self.check_closed()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut request = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            request["params"] = params;
        }

        let mut channel = self.channel.lock().await;
        self.write_line(request.to_string()).await?;

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                }
                line = channel.next_json_line() => {
                    return match line {
                        Some(value) if cancelled => {
                            let _ = value;
                            Err(RuntimeError::Cancelled)
                        }
                        Some(value) => interpret_response(value),
                        None if cancelled => Err(RuntimeError::Cancelled),
                        None => Err(RuntimeError::UnexpectedEof),
                    };
                }
            }
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), RuntimeError> {
        self.check_closed()?;
        let _channel_guard = self.channel.lock().await;
        let notification = json!({"jsonrpc": "2.0", "method": method});
        self.write_line(notification.to_string()).await
    }

    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.send_request(
            cancel,
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "toolrunner", "version": env!("CARGO_PKG_VERSION")},
            })),
        )
        .await?;

        self.send_notification("notifications/initialized").await
    }

    pub async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ExternalToolSchema>, RuntimeError> {
        let result = self.send_request(cancel, "tools/list", None).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| RuntimeError::Wire(format!("malformed tools/list response: {e}")))
    }

    pub async fn call_tool(
        &self,
        cancel: &CancellationToken,
        name: &str,
        args: Option<Value>,
    ) -> Result<CallResult, RuntimeError> {
        let mut params = json!({"name": name});
        if let Some(args) = args {
            params["arguments"] = args;
        }
        let result = self.send_request(cancel, "tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| RuntimeError::Wire(format!("malformed tools/call response: {e}")))
    }

    /// Idempotent: closes the input stream, closes the output stream, and
    /// (for process-owning instances) waits up to 5s for the child before
    /// forcibly terminating it.
    pub async fn close(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(tx) = self.writer_tx.lock().await.take() {
            drop(tx);
        }

        if let Some(process) = &self.process {
            let mut exit_guard = process.exit_rx.lock().await;
            if let Some(exit_rx) = exit_guard.take() {
                if tokio::time::timeout(CLOSE_GRACE, exit_rx).await.is_err() {
                    warn!("external tool-server did not exit within grace period, killing");
                    process.handle.terminate();
                }
            }
        }

        Ok(())
    }
}

fn interpret_response(value: Value) -> Result<Value, RuntimeError> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        error!(code, %message, "external tool-server returned a JSON-RPC error");
        return Err(RuntimeError::JsonRpc { code, message });
    }

    Ok(value.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    /// Wire a client to a fake server task that answers every request in
    /// sequence with `{"tools": []}`, first emitting banner noise.
    fn client_with_echo_server() -> McpClient {
        let (client_write_half, server_read_half) = duplex(4096);
        let (server_write_half, client_read_half) = duplex(4096);
        let client = McpClient::from_streams(client_read_half, client_write_half);

        tokio::spawn(async move {
            let mut reader = BufReader::new(server_read_half);
            let mut writer = server_write_half;
            writer.write_all(b"server starting up\n").await.unwrap();
            writer.write_all(b"listening...\n").await.unwrap();
            writer.flush().await.unwrap();

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let Ok(request) = serde_json::from_str::<Value>(line.trim()) else {
                    continue;
                };
                let id = request["id"].clone();
                let response = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}});
                if writer.write_all(format!("{response}\n").as_bytes()).await.is_err() {
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        client
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let client = client_with_echo_server();
        let cancel = CancellationToken::new();
        client.list_tools(&cancel).await.unwrap();
        let second_id_before = client.next_id.load(Ordering::SeqCst);
        client.list_tools(&cancel).await.unwrap();
        let second_id_after = client.next_id.load(Ordering::SeqCst);
        assert!(second_id_after > second_id_before);
    }

    #[tokio::test]
    async fn banner_lines_are_tolerated() {
        let client = client_with_echo_server();
        let cancel = CancellationToken::new();
        let tools = client.list_tools(&cancel).await.unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn round_trip_through_duplex_pipe() {
        let (client_write_half, server_read_half) = duplex(4096);
        let (server_write_half, client_read_half) = duplex(4096);

        let client = McpClient::from_streams(client_read_half, client_write_half);

        tokio::spawn(async move {
            let mut reader = BufReader::new(server_read_half);
            let mut writer = server_write_half;
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(line.trim()).unwrap();
            let id = request["id"].clone();

            // Banner noise the client must skip.
            writer.write_all(b"server starting up\n").await.unwrap();
            writer.write_all(b"listening...\n").await.unwrap();

            let response = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"tools": [{"server": "", "name": "echo", "description": null, "input_schema": {}}]},
            });
            writer
                .write_all(format!("{response}\n").as_bytes())
                .await
                .unwrap();
            writer.flush().await.unwrap();
        });

        let cancel = CancellationToken::new();
        let tools = client.list_tools(&cancel).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_calls() {
        let client = client_with_echo_server();
        client.close().await.unwrap();
        client.close().await.unwrap();

        let cancel = CancellationToken::new();
        let err = client.list_tools(&cancel).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Closed));
    }

    #[tokio::test]
    async fn jsonrpc_error_response_is_distinct_from_call_result_is_error() {
        let (client_write_half, server_read_half) = duplex(4096);
        let (server_write_half, client_read_half) = duplex(4096);
        let client = McpClient::from_streams(client_read_half, client_write_half);

        tokio::spawn(async move {
            let mut reader = BufReader::new(server_read_half);
            let mut writer = server_write_half;
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(line.trim()).unwrap();
            let id = request["id"].clone();
            let response = json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "method not found"}});
            writer.write_all(format!("{response}\n").as_bytes()).await.unwrap();
            writer.flush().await.unwrap();
        });

        let cancel = CancellationToken::new();
        let err = client.list_tools(&cancel).await.unwrap_err();
        match err {
            RuntimeError::JsonRpc { code, .. } => assert_eq!(code, -32601),
            other => panic!("expected JsonRpc error, got {other:?}"),
        }
    }
}
