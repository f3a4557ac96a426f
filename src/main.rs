//! Demo binary: drives one offline run end to end and prints the journaled
//! event types. Uses a canned `ChatBackend` so it runs without network or
//! credentials; swap in a real backend to talk to a provider.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sa_engine::domain::config::SafetyMode;
use sa_engine::domain::{BoxStream, ChatRequest, EngineError, FinishReason, StreamEvent};
use sa_engine::wal::replay_lines;
use sa_engine::{Agent, ChatBackend, Config};

/// Emits a fixed text completion for every request.
struct CannedBackend;

#[async_trait::async_trait]
impl ChatBackend for CannedBackend {
    async fn stream_chat(&self, _req: ChatRequest) -> Result<BoxStream<'static, StreamEvent>, EngineError> {
        Ok(Box::pin(futures_util::stream::iter(vec![
            StreamEvent::TextDelta("hello from the canned backend".to_string()),
            StreamEvent::Completed { finish_reason: FinishReason::Stop },
        ])))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sa_engine=info")))
        .init();

    // ── Config ─────────────────────────────────────────────────────
    let config_path = std::env::args().nth(1);
    let mut config = match &config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            sa_engine::domain::config::load_config(&raw).map_err(|e| anyhow::anyhow!("{e}"))?
        }
        None => Config::default(),
    };
    if config_path.is_none() {
        config.safety.mode = SafetyMode::Allow;
    }

    let workspace = std::env::current_dir()?;
    tracing::info!(workspace = %workspace.display(), "starting demo run");

    // ── Agent ──────────────────────────────────────────────────────
    let agent = Agent::builder(config, &workspace).backend(Arc::new(CannedBackend)).build()?;

    let result = agent.run("demonstrate one full run", None, None).await?;
    println!("status: {:?}", result.status);
    println!("final output: {}", result.final_output);
    println!("journal: {}", result.wal_locator);

    // ── Replay ─────────────────────────────────────────────────────
    let raw = std::fs::read_to_string(&result.wal_locator)?;
    let lines: Vec<String> = raw.lines().map(str::to_string).collect();
    let replayed = replay_lines(&lines);
    for event in &replayed.events {
        let tag = serde_json::to_value(event)?
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        println!("  {tag}");
    }

    Ok(())
}
