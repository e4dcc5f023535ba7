use std::io::Write;

use chromepilot_agent::{AgentEvent, SharedSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use super::{load_config, resolve_browser_url, Runtime};

const PROMPT: &str = "> 你的訊息（直接 Enter 結束）：";

pub async fn run(message: Option<String>, session_key: Option<String>) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    config.require_api_key()?;

    println!("🚀 正在啟動 AI 助手...");
    let browser_url = resolve_browser_url(&config).await?;
    let runtime = Runtime::start(&config, &paths, &browser_url, session_key.as_deref()).await?;
    println!("✓ Agent 初始化完成");
    println!("✓ Chrome DevTools MCP 已連接（{}）\n", browser_url);

    if runtime.session.has_state() {
        println!("✓ 已載入先前的對話狀態\n");
    }

    let result = match message {
        Some(text) => run_turn(&runtime.session, &text).await,
        None => repl(&runtime.session).await,
    };

    runtime.mcp.close().await;
    result
}

async fn repl(session: &SharedSession) -> anyhow::Result<()> {
    println!("💬 AI 助手已就緒！");
    println!("   - 可以進行一般對話");
    println!("   - 需要時會自動使用瀏覽器操作");
    println!("   - 輸入空白行結束程式\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", PROMPT);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            break;
        }

        if let Err(e) = run_turn(session, text).await {
            eprintln!("Error: {}", e);
        }
    }

    info!("Chat session ended");
    Ok(())
}

async fn run_turn(session: &SharedSession, text: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !matches!(event, AgentEvent::Thinking { .. }) {
                eprintln!("  · {}", event.describe());
            }
        }
    });

    let outcome = session.run_turn(text, Some(&tx)).await;
    drop(tx);
    let _ = progress.await;

    let outcome = outcome?;
    if outcome.saved {
        println!("✓ 狀態已保存");
    }
    println!("\n=== Agent Output ===\n{}\n", outcome.output);
    Ok(())
}
