use super::error::McpError;
use super::ToolBackend;
use crate::domain::types::{ContentItem, ToolCallOutput, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC client around a spawned tool-server subprocess, speaking
/// line-delimited messages over the child's stdio. The handle owns the child:
/// `kill_on_drop` releases the process on every exit path, and `shutdown`
/// tears protocol and transport down in reverse acquisition order.
#[derive(Clone)]
pub struct McpProcess {
    inner: Arc<McpProcessInner>,
}

struct McpProcessInner {
    label: String,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<String, oneshot::Sender<Result<Value, McpError>>>>,
    id_counter: AtomicU64,
}

impl McpProcess {
    /// Spawn the tool server and run the initialize handshake. Fails fast if
    /// the process cannot be started or rejects initialization.
    pub async fn connect(command: &str, args: &[String]) -> Result<Self, McpError> {
        let label = command.to_string();
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            server: label.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| transport_error(&label, "failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| transport_error(&label, "failed to capture server stdout"))?;

        let inner = Arc::new(McpProcessInner {
            label,
            child: AsyncMutex::new(Some(child)),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            reader_inner.reader_loop(stdout).await;
        });

        let process = Self { inner };
        match process.initialize_sequence().await {
            Ok(()) => Ok(process),
            Err(err) => {
                process.shutdown().await;
                Err(err)
            }
        }
    }

    /// Kill the child and fail anything still pending. Safe to call twice.
    pub async fn shutdown(&self) {
        self.inner.reset().await;
    }

    async fn initialize_sequence(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        self.inner.send_request("initialize", params).await?;
        self.inner
            .send_notification("notifications/initialized", json!({}))
            .await
    }
}

#[async_trait]
impl ToolBackend for McpProcess {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let result = self.inner.send_request("tools/list", json!({})).await?;
        let mut tools = Vec::new();
        if let Some(array) = result.get("tools").and_then(Value::as_array) {
            for tool in array {
                let Some(name) = tool.get("name").and_then(Value::as_str) else {
                    continue;
                };
                tools.push(ToolDescriptor {
                    name: name.to_string(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
                });
            }
        }
        debug!(server = %self.inner.label, tools = tools.len(), "Listed backend tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallOutput, McpError> {
        let params = json!({
            "name": name,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        let result = self.inner.send_request("tools/call", params).await?;

        let mut output = ToolCallOutput {
            content: Vec::new(),
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        if let Some(array) = result.get("content").and_then(Value::as_array) {
            for block in array {
                let is_text = block
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|kind| kind.eq_ignore_ascii_case("text"))
                    .unwrap_or(false);
                if is_text {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        output.content.push(ContentItem::Text(text.to_string()));
                        continue;
                    }
                }
                output.content.push(ContentItem::Other(block.clone()));
            }
        }
        Ok(output)
    }
}

impl McpProcessInner {
    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(item) = lines.next_line().await {
            let Some(raw) = item else { break };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.process_inbound_message(value).await,
                Err(source) => {
                    warn!(
                        server = %self.label,
                        line = raw,
                        %source,
                        "received invalid JSON from tool server"
                    );
                }
            }
        }

        self.reset().await;
    }

    async fn process_inbound_message(&self, value: Value) {
        if let Some(id) = value.get("id").cloned() {
            if value.get("method").is_some() {
                self.handle_server_request(id, value).await;
            } else {
                self.handle_response(id, value).await;
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            debug!(server = %self.label, method, "received notification from tool server");
        }
    }

    async fn handle_response(&self, id: Value, value: Value) {
        let key = match response_key(&id) {
            Some(key) => key,
            None => return,
        };

        let responder = {
            let mut pending = self.pending.lock().await;
            pending.remove(&key)
        };

        let Some(sender) = responder else {
            debug!(server = %self.label, response_id = key, "response for unknown request");
            return;
        };

        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let _ = sender.send(Err(McpError::Rpc {
                server: self.label.clone(),
                code,
                message,
            }));
        } else {
            let _ = sender.send(Ok(value));
        }
    }

    async fn handle_server_request(&self, id: Value, value: Value) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let outcome = match method {
            "ping" => self.send_response(id, json!({})).await,
            other => {
                warn!(server = %self.label, method = other, "server sent unsupported request");
                let error = json!({
                    "code": -32601,
                    "message": format!("client does not implement method '{other}'"),
                });
                self.send_error(id, error).await
            }
        };
        if let Err(err) = outcome {
            warn!(server = %self.label, %err, "failed to answer server request");
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        if let Err(err) = self.write_message(&payload).await {
            // The response will never arrive; drop the parked sender so the
            // pending map does not accumulate dead entries until reset.
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(McpError::Cancelled {
                server: self.label.clone(),
            }),
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.write_message(&payload).await
    }

    async fn send_response(&self, id: Value, result: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result
        });
        self.write_message(&payload).await
    }

    async fn send_error(&self, id: Value, error: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error
        });
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), McpError> {
        let encoded = serde_json::to_string(message).map_err(|source| McpError::InvalidJson {
            server: self.label.clone(),
            source,
        })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| transport_error(&self.label, "writer not initialised"))?;
        for chunk in [encoded.as_bytes(), b"\n"] {
            stream
                .write_all(chunk)
                .await
                .map_err(|source| transport_error(&self.label, source.to_string()))?;
        }
        stream
            .flush()
            .await
            .map_err(|source| transport_error(&self.label, source.to_string()))?;
        Ok(())
    }

    async fn reset(&self) {
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }

        {
            let mut child = self.child.lock().await;
            if let Some(mut running) = child.take() {
                if let Err(err) = running.kill().await {
                    debug!(
                        server = %self.label,
                        %err,
                        "failed to kill tool server process (may have already exited)"
                    );
                }
                let _ = running.wait().await;
            }
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(McpError::Terminated {
                server: self.label.clone(),
            }));
        }
    }

    fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }
}

fn response_key(id: &Value) -> Option<String> {
    match id {
        Value::String(value) => Some(value.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

fn transport_error(server: &str, message: impl Into<String>) -> McpError {
    McpError::Transport {
        server: server.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected_inner() -> McpProcessInner {
        McpProcessInner {
            label: "test-server".to_string(),
            child: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        }
    }

    #[tokio::test]
    async fn failed_write_does_not_leak_a_pending_entry() {
        let inner = disconnected_inner();

        let error = inner
            .send_request("tools/list", json!({}))
            .await
            .expect_err("request must fail without a writer");

        assert!(matches!(error, McpError::Transport { .. }));
        assert!(inner.pending.lock().await.is_empty());
    }
}
