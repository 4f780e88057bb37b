//! MCP client over newline-delimited JSON-RPC
//!
//! One request is in flight at a time. Responses are matched by id; server
//! notifications and responses to abandoned requests are skipped, so a call
//! dropped half-way never desynchronizes the session.

use crate::llm::ToolDefinition;
use crate::runtime::{ToolContent, ToolInvocationError, ToolSession};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const MAX_MESSAGE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("server script must be a .py or .js file: {}", .0.display())]
    UnsupportedScript(PathBuf),
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl From<McpError> for ToolInvocationError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Rpc { message, .. } => ToolInvocationError::Failed(message),
            other => ToolInvocationError::Session(other.to_string()),
        }
    }
}

/// Pick the interpreter for a server script by its extension
fn interpreter_for(script: &Path) -> Result<&'static str, McpError> {
    match script.extension().and_then(|e| e.to_str()) {
        Some("py") => Ok("python"),
        Some("js") => Ok("node"),
        _ => Err(McpError::UnsupportedScript(script.to_path_buf())),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "empty_schema")]
    input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    is_error: bool,
}

impl CallToolResult {
    fn into_content(self) -> Result<ToolContent, ToolInvocationError> {
        if self.is_error {
            let message = self
                .content
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolInvocationError::Failed(if message.is_empty() {
                "tool reported an error".to_string()
            } else {
                message
            }));
        }

        match self.content.as_slice() {
            [block] if block.get("type").and_then(Value::as_str) == Some("text") => {
                match block.get("text").and_then(Value::as_str) {
                    Some(text) => Ok(ToolContent::text(text)),
                    None => Ok(ToolContent::Json(block.clone())),
                }
            }
            _ => Ok(ToolContent::Json(Value::Array(self.content))),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

struct RpcIo<R, W> {
    lines: FramedRead<R, LinesCodec>,
    writer: W,
    next_id: u64,
}

impl<R, W> RpcIo<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn write(&mut self, message: &Value) -> Result<(), McpError> {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self, id: u64) -> Result<Value, McpError> {
        loop {
            let line = match self.lines.next().await {
                None => return Err(McpError::Closed),
                Some(Err(e)) => return Err(McpError::Protocol(e.to_string())),
                Some(Ok(line)) => line,
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: RpcMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping non JSON-RPC server output");
                    continue;
                }
            };

            if let Some(method) = &message.method {
                tracing::debug!(method = %method, "Ignoring server-initiated message");
                continue;
            }
            if message.id.as_ref().and_then(Value::as_u64) != Some(id) {
                tracing::debug!(expected = id, got = ?message.id, "Skipping stale response");
                continue;
            }

            if let Some(error) = message.error {
                return Err(McpError::Rpc {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(message.result.unwrap_or(Value::Null));
        }
    }
}

/// MCP client over any byte stream pair
pub struct McpClient<R, W> {
    io: Mutex<RpcIo<R, W>>,
}

impl<R, W> McpClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Open a session: `initialize`, then `notifications/initialized`
    pub async fn connect(reader: R, writer: W) -> Result<Self, McpError> {
        let client = Self {
            io: Mutex::new(RpcIo {
                lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE)),
                writer,
                next_id: 0,
            }),
        };

        let init = client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
                }),
            )
            .await?;
        let server = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let protocol = init
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(server, protocol, "MCP session initialized");
        client.notify("notifications/initialized").await?;

        Ok(client)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let mut io = self.io.lock().await;
        io.next_id += 1;
        let id = io.next_id;
        let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
        message["params"] = params;
        io.write(&message).await?;
        io.read_response(id).await
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let mut io = self.io.lock().await;
        io.write(&json!({"jsonrpc": "2.0", "method": method})).await
    }

    /// Every tool the server offers, following pagination
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({"cursor": c}),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {e}")))?;
            tools.extend(page.tools.into_iter().map(|t| ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        let mut params = json!({"name": name});
        params["arguments"] = arguments;
        let result = self.request("tools/call", params).await?;
        let result: CallToolResult = serde_json::from_value(result).map_err(|e| {
            ToolInvocationError::Session(format!("invalid tools/call result: {e}"))
        })?;
        result.into_content()
    }
}

#[async_trait]
impl<R, W> ToolSession for McpClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError> {
        Ok(McpClient::list_tools(self).await?)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        McpClient::call_tool(self, name, arguments).await
    }
}

// ============================================================================
// Stdio session
// ============================================================================

/// MCP server running as a child process. The child is killed on drop.
pub struct McpStdioSession {
    client: McpClient<ChildStdout, ChildStdin>,
    _child: Child,
}

impl McpStdioSession {
    pub async fn spawn(script: &Path) -> Result<Self, McpError> {
        let command = interpreter_for(script)?;
        let mut child = Command::new(command)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn { command, source })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout unavailable".to_string()))?;

        tracing::info!(script = %script.display(), command, pid = ?child.id(), "Started MCP server");
        let client = McpClient::connect(stdout, stdin).await?;

        Ok(Self {
            client,
            _child: child,
        })
    }
}

#[async_trait]
impl ToolSession for McpStdioSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError> {
        Ok(self.client.list_tools().await?)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        self.client.call_tool(name, arguments).await
    }
}
