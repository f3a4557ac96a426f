//! Adapters that let [`sa_engine_context::ContextRecovery`] drive the
//! agent's own `ChatBackend`/`HumanIoProvider` without depending on either
//! crate directly.

use std::sync::Arc;

use sa_engine_context::{HumanChoice, HumanChoiceProvider, Summarizer};
use sa_engine_domain::{ChatBackend, ChatRequest, EngineError, Message, Result, StreamEvent};
use sa_engine_tools::HumanIoProvider;

/// Runs a one-shot, non-tool chat request against the run's `ChatBackend`
/// and collects the `TextDelta`s into the summary string.
pub struct ChatBackendSummarizer {
    pub backend: Arc<dyn ChatBackend>,
}

#[async_trait::async_trait]
impl Summarizer for ChatBackendSummarizer {
    async fn summarize(&self, transcript: &str, fixed_prompt: &str) -> Result<String> {
        use futures_util::StreamExt;

        let request = ChatRequest {
            messages: vec![Message::system(fixed_prompt), Message::user(transcript)],
            tools: Vec::new(),
        };
        let mut stream = self.backend.stream_chat(request).await?;
        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta(text) => summary.push_str(&text),
                StreamEvent::Error(message) => return Err(EngineError::ChatBackend(message)),
                StreamEvent::Completed { .. } => break,
                StreamEvent::ToolCalls(_) | StreamEvent::ContextLengthExceeded => {}
            }
        }
        Ok(summary)
    }
}

/// Offers the compaction choices through the run's `HumanIoProvider`,
/// parsing a free-text reply into a [`HumanChoice`]. Any unrecognized
/// reply is treated as `terminate` — refusing to guess at recovery
/// strategy from ambiguous input is the fail-safe direction.
pub struct HumanIoChoiceAdapter {
    pub human_io: Arc<dyn HumanIoProvider>,
}

#[async_trait::async_trait]
impl HumanChoiceProvider for HumanIoChoiceAdapter {
    async fn choose(&self) -> HumanChoice {
        let prompt = "The run is out of context space. Reply with one of: \
            compact, handoff, increase_budget, terminate.";
        match self.human_io.request_human_input(prompt).await {
            Ok(reply) => match reply.trim().to_ascii_lowercase().as_str() {
                "compact" => HumanChoice::CompactContinue,
                "handoff" => HumanChoice::HandoffNewRun,
                "increase_budget" => HumanChoice::IncreaseBudgetContinue,
                _ => HumanChoice::Terminate,
            },
            Err(_) => HumanChoice::Terminate,
        }
    }
}
