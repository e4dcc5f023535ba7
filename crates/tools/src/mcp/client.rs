use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chromepilot_core::config::McpConfig;
use chromepilot_core::{safe_truncate, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// ─── MCP tool schema ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

// ─── Server config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Keep the `tools/list` result from startup instead of re-fetching it.
    pub cache_tools_list: bool,
}

impl McpServerConfig {
    /// `npx -y chrome-devtools-mcp@latest --browserUrl=<url> --lang=<lang>`
    pub fn chrome_devtools(browser_url: &str, lang: &str) -> Self {
        Self::from_config(&McpConfig::default(), browser_url, lang)
    }

    /// Same server, with command and package taken from config.
    pub fn from_config(cfg: &McpConfig, browser_url: &str, lang: &str) -> Self {
        Self {
            name: "chrome-devtools".to_string(),
            command: cfg.command.clone(),
            args: vec![
                "-y".to_string(),
                cfg.package.clone(),
                format!("--browserUrl={}", browser_url),
                format!("--lang={}", lang),
            ],
            env: HashMap::new(),
            cache_tools_list: cfg.cache_tools_list,
        }
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct McpClient {
    server_name: String,
    stdin: Mutex<Writer>,
    next_id: AtomicU64,
    pending: PendingMap,
    tools: Mutex<Vec<McpTool>>,
    cache_tools_list: bool,
    closed: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
}

impl McpClient {
    /// Spawn the MCP server and run the initialize handshake.
    pub async fn start(config: &McpServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        info!(server = %config.name, command = %config.command, args = ?config.args, "Starting MCP server");
        let mut child = cmd.spawn().map_err(|e| {
            Error::Tool(format!("MCP[{}]: failed to spawn '{}': {}", config.name, config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Tool(format!("MCP[{}]: no stdin", config.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Tool(format!("MCP[{}]: no stdout", config.name)))?;

        let client = Self::connect(&config.name, stdout, Box::new(stdin), config.cache_tools_list);
        *client.child.lock().await = Some(child);

        client.initialize().await?;
        client.refresh_tools().await?;
        Ok(client)
    }

    /// Wire a client to an already-open transport. No handshake is sent.
    fn connect<R>(server_name: &str, reader: R, writer: Writer, cache_tools_list: bool) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(reader_task(
            reader,
            pending.clone(),
            closed.clone(),
            server_name.to_string(),
        ));

        Self {
            server_name: server_name.to_string(),
            stdin: Mutex::new(writer),
            next_id: AtomicU64::new(1),
            pending,
            tools: Mutex::new(Vec::new()),
            cache_tools_list,
            closed,
            child: Mutex::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn err(&self, msg: impl std::fmt::Display) -> Error {
        Error::Tool(format!("MCP[{}]: {}", self.server_name, msg))
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.err(format!("write error: {}", e)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| self.err(format!("write error: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.err(format!("flush error: {}", e)))
    }

    /// Send a JSON-RPC request and wait for its response.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let line = serde_json::to_string(&req).map_err(|e| self.err(format!("serialize error: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        {
            // `closed` only flips while `pending` is held, so a sender
            // inserted here is always drained by the shutdown path.
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(self.err("server closed"));
            }
            pending.insert(id, tx);
        }

        debug!(server = %self.server_name, id, method, "MCP → request");
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| self.err("server closed"))?
            .map_err(|e| self.err(e))
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "chromepilot",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.call("initialize", Some(params)).await?;
        debug!(server = %self.server_name, ?result, "MCP initialized");

        let notif = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.write_line(&notif.to_string()).await
    }

    /// Fetch `tools/list` and replace the local cache.
    pub async fn refresh_tools(&self) -> Result<()> {
        let result = self.call("tools/list", None).await?;
        let tools: Vec<McpTool> =
            serde_json::from_value(result.get("tools").cloned().unwrap_or_else(|| json!([])))
                .map_err(|e| self.err(format!("parse tools: {}", e)))?;
        info!(server = %self.server_name, count = tools.len(), "MCP tools loaded");
        *self.tools.lock().await = tools;
        Ok(())
    }

    /// The server's tools; re-fetched first unless the list is cached.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        if !self.cache_tools_list {
            self.refresh_tools().await?;
        }
        Ok(self.tools.lock().await.clone())
    }

    /// `tools/call`. Text content blocks are joined into one string.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let params = json!({
            "name": tool_name,
            "arguments": arguments
        });
        let result = self.call("tools/call", Some(params)).await?;

        let text = joined_text(&result);
        if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            let msg = text.unwrap_or_else(|| "MCP tool returned an error".to_string());
            return Err(Error::Tool(msg));
        }

        match text {
            Some(t) => Ok(Value::String(t)),
            None => Ok(result.get("content").cloned().unwrap_or(Value::Null)),
        }
    }

    /// Stop the server. Pending and later calls fail with `Error::Tool`.
    pub async fn close(&self) {
        if !shut_down(&self.pending, &self.closed, "MCP server closed").await {
            return;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(server = %self.server_name, error = %e, "Failed to kill MCP server");
            }
        }
        info!(server = %self.server_name, "MCP server closed");
    }
}

fn joined_text(result: &Value) -> Option<String> {
    let arr = result.get("content")?.as_array()?;
    let text = arr
        .iter()
        .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Mark the client closed and fail every waiting call, under the pending
/// lock. Returns false if it was already closed.
async fn shut_down(pending: &PendingMap, closed: &AtomicBool, reason: &str) -> bool {
    let mut map = pending.lock().await;
    let was_closed = closed.swap(true, Ordering::SeqCst);
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(reason.to_string()));
    }
    !was_closed
}

/// Dispatches newline-delimited responses to waiting callers.
async fn reader_task<R>(reader: R, pending: PendingMap, closed: Arc<AtomicBool>, server_name: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                debug!(server = %server_name, "MCP ← {}", safe_truncate(&line, 200));
                let resp = match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(resp) => resp,
                    Err(e) => {
                        warn!(server = %server_name, "MCP: failed to parse response: {}", e);
                        continue;
                    }
                };
                // Notifications carry no id.
                let Some(id) = resp.id else { continue };
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let payload = match resp.error {
                        Some(err) => Err(format!("JSON-RPC error {}: {}", err.code, err.message)),
                        None => Ok(resp.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(payload);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                if !closed.load(Ordering::SeqCst) {
                    error!(server = %server_name, "MCP: stdout closed");
                }
                break;
            }
            Err(e) => {
                error!(server = %server_name, "MCP: read error: {}", e);
                break;
            }
        }
    }

    shut_down(&pending, &closed, "MCP server stdout closed").await;
}
