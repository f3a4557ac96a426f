//! `HumanIoProvider` implementations. Asking a human is always optional —
//! tool calls that need it (`human_input`) and skill env-var resolution
//! under `ask_human` both go through this seam.

use sa_engine_domain::{EngineError, Result};
use sa_engine_tools::HumanIoProvider;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Prompts on stdout and reads one line from stdin. Suitable for a CLI
/// front end driving the engine interactively; not used in headless runs.
pub struct StdinHumanIoProvider;

#[async_trait::async_trait]
impl HumanIoProvider for StdinHumanIoProvider {
    async fn request_human_input(&self, prompt: &str) -> Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(EngineError::Other("stdin closed while waiting for human input".into()));
        }
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }
}

/// Always refuses — the correct choice for a headless run with no human
/// attached, so a tool that needs input fails fast with `HumanRequired`
/// instead of hanging.
pub struct NullHumanIoProvider;

#[async_trait::async_trait]
impl HumanIoProvider for NullHumanIoProvider {
    async fn request_human_input(&self, _prompt: &str) -> Result<String> {
        Err(EngineError::Other("no human IO provider configured for this run".into()))
    }
}
