use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chromepilot_agent::{AgentEvent, SharedSession};
use chromepilot_tools::mcp::McpClient;
use futures::{SinkExt, StreamExt};
use rust_embed::Embed;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, OnceCell};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::{load_config, resolve_browser_url, Runtime};

// ---------------------------------------------------------------------------
// WebSocket protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
enum LogType {
    Info,
    Success,
    Error,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsEvent {
    Connected {
        message: String,
        #[serde(rename = "maxTurns")]
        max_turns: u32,
        #[serde(rename = "hasState")]
        has_state: bool,
    },
    Log {
        message: String,
        #[serde(rename = "logType")]
        log_type: LogType,
        timestamp: String,
    },
    Result {
        output: String,
        success: bool,
    },
    Error {
        message: String,
    },
}

impl WsEvent {
    fn log(message: impl Into<String>, log_type: LogType) -> Self {
        WsEvent::Log {
            message: message.into(),
            log_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        WsEvent::Error {
            message: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Client → server messages.
#[derive(Debug, PartialEq)]
enum Inbound {
    Run(String),
    Ignored(String),
    Invalid(String),
}

fn parse_inbound(text: &str) -> Inbound {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Inbound::Invalid(e.to_string()),
    };
    match parsed.get("type").and_then(|v| v.as_str()) {
        Some("run") => {
            let text = parsed.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            Inbound::Run(text.trim().to_string())
        }
        Some(other) => Inbound::Ignored(other.to_string()),
        None => Inbound::Ignored(String::new()),
    }
}

// ---------------------------------------------------------------------------
// Shared state passed to HTTP/WS handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct WebState {
    /// Set once the MCP server and agent are up.
    session: Arc<OnceCell<Arc<SharedSession>>>,
    /// Broadcast channel for events every client sees
    ws_broadcast: broadcast::Sender<String>,
    max_turns: u32,
}

impl WebState {
    fn new(max_turns: u32) -> Self {
        let (ws_broadcast, _) = broadcast::channel(256);
        Self {
            session: Arc::new(OnceCell::new()),
            ws_broadcast,
            max_turns,
        }
    }

    fn broadcast(&self, event: WsEvent) {
        // No receivers just means no client is connected.
        let _ = self.ws_broadcast.send(event.to_json());
    }

    fn send_log(&self, message: impl Into<String>, log_type: LogType) {
        self.broadcast(WsEvent::log(message, log_type));
    }

    fn welcome(&self) -> WsEvent {
        WsEvent::Connected {
            message: "已連接到 Chrome MCP Agent 控制台".to_string(),
            max_turns: self.max_turns,
            has_state: self.session.get().map(|s| s.has_state()).unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

/// Validate one `run` request and start it. Replies meant only for the
/// requester go through `reply`.
fn dispatch(state: &WebState, text: String, reply: &mpsc::UnboundedSender<String>) {
    if text.is_empty() {
        let _ = reply.send(WsEvent::error("請輸入訊息").to_json());
        return;
    }

    let Some(session) = state.session.get().cloned() else {
        state.send_log("× Agent 尚未初始化", LogType::Error);
        let _ = reply.send(WsEvent::error("Agent 尚未初始化，請稍後再試").to_json());
        return;
    };

    let state = state.clone();
    tokio::spawn(async move { handle_run(state, session, text).await });
}

async fn handle_run(state: WebState, session: Arc<SharedSession>, text: String) {
    state.send_log(format!("📝 收到訊息: {}", text), LogType::Info);
    state.send_log("⏳ Agent 處理中...", LogType::Info);

    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let progress_state = state.clone();
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let log_type = match event {
                AgentEvent::ToolFinished { success: false, .. } => LogType::Error,
                _ => LogType::Info,
            };
            progress_state.send_log(event.describe(), log_type);
        }
    });

    let outcome = session.run_turn(&text, Some(&tx)).await;
    drop(tx);
    let _ = progress.await;

    match outcome {
        Ok(outcome) => {
            if outcome.saved {
                state.send_log("✓ 狀態已保存", LogType::Success);
            }
            state.broadcast(WsEvent::Result {
                output: outcome.output,
                success: true,
            });
            state.send_log("✅ 任務完成", LogType::Success);
        }
        Err(e) => {
            error!(error = %e, "Agent run failed");
            state.send_log(format!("❌ 執行錯誤: {}", e), LogType::Error);
            state.broadcast(WsEvent::error(e.to_string()));
        }
    }
}

async fn handle_ws_upgrade(ws: WebSocketUpgrade, State(state): State<WebState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: WebState) {
    let client_id = uuid::Uuid::new_v4();
    info!(%client_id, "WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut broadcast_rx = state.ws_broadcast.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    let _ = reply_tx.send(state.welcome().to_json());

    // Task: forward direct replies and broadcast events to this client
    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = reply_rx.recv() => msg,
                recv = broadcast_rx.recv() => match recv {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%client_id, skipped = n, "WebSocket client lagging");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if ws_sender.send(WsMessage::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(%client_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        match msg {
            WsMessage::Text(text) => match parse_inbound(&text) {
                Inbound::Run(task) => dispatch(&state, task, &reply_tx),
                Inbound::Ignored(kind) => debug!(%client_id, kind = %kind, "Ignoring WebSocket message"),
                Inbound::Invalid(e) => {
                    let _ = reply_tx.send(WsEvent::error(format!("訊息處理錯誤: {}", e)).to_json());
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    info!(%client_id, "WebSocket client disconnected");
}

async fn handle_health(State(state): State<WebState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "agentReady": state.session.initialized(),
    }))
}

// ---------------------------------------------------------------------------
// Embedded static files
// ---------------------------------------------------------------------------

#[derive(Embed)]
#[folder = "web/public"]
struct ConsoleAssets;

async fn handle_static(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let file_path = if path.is_empty() { "index.html" } else { path };

    match ConsoleAssets::get(file_path) {
        Some(content) => {
            let mime = mime_guess::from_path(file_path).first_or_octet_stream().to_string();
            let body: Vec<u8> = content.data.into();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                body,
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/ws", get(handle_ws_upgrade))
        .route("/health", get(handle_health))
        .fallback(handle_static)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    config.require_api_key()?;

    let host = host.unwrap_or_else(|| config.web.host.clone());
    let port = port.unwrap_or(config.web.port);
    let state = WebState::new(config.agent.max_turns);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("🚀 Web 控制台啟動於 http://{}", bind_addr);
    println!("📊 最大回合數: {}", config.agent.max_turns);
    println!("⏳ 正在初始化 Agent...");

    // The console is served while the agent starts; early requests get an error reply.
    let mcp_handle: Arc<OnceCell<Arc<McpClient>>> = Arc::new(OnceCell::new());
    let init_state = state.clone();
    let init_mcp = mcp_handle.clone();
    tokio::spawn(async move {
        let started = async {
            let browser_url = resolve_browser_url(&config).await?;
            Runtime::start(&config, &paths, &browser_url, None).await
        }
        .await;

        match started {
            Ok(runtime) => {
                let _ = init_mcp.set(runtime.mcp.clone());
                if runtime.session.has_state() {
                    println!("✓ 已載入先前的對話狀態");
                }
                let _ = init_state.session.set(Arc::new(runtime.session));
                println!("✓ AI 助手已就緒");
                println!("   - 可以進行一般對話");
                println!("   - 需要時會自動使用瀏覽器操作\n");
            }
            Err(e) => {
                error!(error = %e, "Agent initialization failed");
                eprintln!("× 初始化失敗: {:#}", e);
                eprintln!("⚠️  伺服器已啟動但 Agent 無法使用");
            }
        }
    });

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("\n正在關閉伺服器...");
    if let Some(mcp) = mcp_handle.get() {
        mcp.close().await;
    }
    println!("伺服器已關閉");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
