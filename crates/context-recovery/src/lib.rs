//! Context-length overflow recovery: compaction, ask-first escalation,
//! handoff, and budget-increase recovery (C7).

pub mod artifact;
pub mod truncate;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use sa_engine_domain::config::{ContextRecoveryConfig, ContextRecoveryMode};
use sa_engine_domain::{EngineError, Message, Result};

pub use artifact::{write_summary_artifact, SummaryArtifact};
pub use truncate::{format_transcript, split_for_compaction};

const COMPACTION_PROMPT: &str =
    "Summarize the conversation so far in a way that preserves the task's goal, \
     decisions made, and any state needed to continue. Be concise.";

/// A one-shot summarizer the recovery path calls to turn a truncated
/// transcript into a summary: a single compaction turn against the
/// executor model with a fixed prompt.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str, fixed_prompt: &str) -> Result<String>;
}

/// The choices offered to a human under `ask_first`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumanChoice {
    CompactContinue,
    HandoffNewRun,
    IncreaseBudgetContinue,
    Terminate,
}

#[async_trait::async_trait]
pub trait HumanChoiceProvider: Send + Sync {
    async fn choose(&self) -> HumanChoice;
}

#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub history: Vec<Message>,
    pub artifact_path: String,
    pub summary_len: usize,
    pub summary_sha256: String,
}

#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// `fail_fast`, or `ask_first` resolved to `terminate`.
    Failed,
    Compacted(CompactionOutcome),
    Handoff(CompactionOutcome),
    BudgetIncreased { extra_steps: u32, extra_wall_time_sec: u64, compaction: CompactionOutcome },
}

pub struct ContextRecovery {
    config: ContextRecoveryConfig,
    artifacts_dir: PathBuf,
    compactions_performed: AtomicU32,
}

impl ContextRecovery {
    pub fn new(config: ContextRecoveryConfig, artifacts_dir: PathBuf) -> Self {
        Self { config, artifacts_dir, compactions_performed: AtomicU32::new(0) }
    }

    pub fn compactions_performed(&self) -> u32 {
        self.compactions_performed.load(Ordering::SeqCst)
    }

    fn can_compact(&self) -> bool {
        self.compactions_performed() < self.config.max_compactions_per_run
    }

    /// Run one compaction: truncate, summarize, persist the artifact, and
    /// rebuild history as `[{summary}, ...last K messages...]`.
    pub async fn compact(&self, history: &[Message], summarizer: &dyn Summarizer) -> Result<CompactionOutcome> {
        if !self.can_compact() {
            return Err(EngineError::ContextRecovery(format!(
                "max_compactions_per_run ({}) exhausted",
                self.config.max_compactions_per_run
            )));
        }

        let (to_summarize, kept) = split_for_compaction(history, self.config.compaction_keep_last_messages);
        let transcript = format_transcript(to_summarize, self.config.compaction_history_max_chars);
        let summary = summarizer.summarize(&transcript, COMPACTION_PROMPT).await?;

        let index = self.compactions_performed.fetch_add(1, Ordering::SeqCst) + 1;
        let artifact = write_summary_artifact(&self.artifacts_dir, index, &summary)?;

        let mut rebuilt = Vec::with_capacity(1 + kept.len());
        rebuilt.push(Message::system(summary));
        rebuilt.extend(kept.iter().cloned());

        Ok(CompactionOutcome {
            history: rebuilt,
            artifact_path: artifact.path.display().to_string(),
            summary_len: artifact.summary_len,
            summary_sha256: artifact.summary_sha256,
        })
    }

    /// Resolve a `context_length_exceeded` event into the action the agent
    /// loop should take, honoring `config.mode` and `ask_first`'s human
    /// interaction (with timeout fallback to `ask_first_fallback_mode`).
    pub async fn recover(
        &self,
        history: &[Message],
        summarizer: &dyn Summarizer,
        human: Option<&dyn HumanChoiceProvider>,
        human_timeout_ms: u64,
    ) -> Result<RecoveryAction> {
        match self.config.mode {
            ContextRecoveryMode::FailFast => Ok(RecoveryAction::Failed),
            ContextRecoveryMode::CompactFirst => Ok(RecoveryAction::Compacted(self.compact(history, summarizer).await?)),
            ContextRecoveryMode::AskFirst => {
                let Some(provider) = human else {
                    return self.recover_fallback(history, summarizer).await;
                };
                match tokio::time::timeout(Duration::from_millis(human_timeout_ms), provider.choose()).await {
                    Ok(choice) => self.apply_human_choice(choice, history, summarizer).await,
                    Err(_elapsed) => {
                        tracing::warn!("ask_first human interaction timed out, falling back");
                        self.recover_fallback(history, summarizer).await
                    }
                }
            }
        }
    }

    async fn recover_fallback(&self, history: &[Message], summarizer: &dyn Summarizer) -> Result<RecoveryAction> {
        match self.config.ask_first_fallback_mode {
            ContextRecoveryMode::FailFast => Ok(RecoveryAction::Failed),
            // A fallback of ask_first (with no provider) degrades to fail_fast
            // rather than looping forever.
            ContextRecoveryMode::AskFirst => Ok(RecoveryAction::Failed),
            ContextRecoveryMode::CompactFirst => Ok(RecoveryAction::Compacted(self.compact(history, summarizer).await?)),
        }
    }

    async fn apply_human_choice(
        &self,
        choice: HumanChoice,
        history: &[Message],
        summarizer: &dyn Summarizer,
    ) -> Result<RecoveryAction> {
        match choice {
            HumanChoice::Terminate => Ok(RecoveryAction::Failed),
            HumanChoice::CompactContinue => Ok(RecoveryAction::Compacted(self.compact(history, summarizer).await?)),
            HumanChoice::HandoffNewRun => Ok(RecoveryAction::Handoff(self.compact(history, summarizer).await?)),
            HumanChoice::IncreaseBudgetContinue => Ok(RecoveryAction::BudgetIncreased {
                extra_steps: self.config.increase_budget_extra_steps,
                extra_wall_time_sec: self.config.increase_budget_extra_wall_time_sec,
                compaction: self.compact(history, summarizer).await?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSummarizer(&'static str);
    #[async_trait::async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _transcript: &str, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FixedChoice(HumanChoice);
    #[async_trait::async_trait]
    impl HumanChoiceProvider for FixedChoice {
        async fn choose(&self) -> HumanChoice {
            self.0
        }
    }

    struct NeverResponds;
    #[async_trait::async_trait]
    impl HumanChoiceProvider for NeverResponds {
        async fn choose(&self) -> HumanChoice {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn sample_history() -> Vec<Message> {
        (0..10).map(|i| Message::user(format!("msg {i}"))).collect()
    }

    fn recovery_with_mode(mode: ContextRecoveryMode, dir: &std::path::Path) -> ContextRecovery {
        let config = ContextRecoveryConfig { mode, compaction_keep_last_messages: 2, ..Default::default() };
        ContextRecovery::new(config, dir.to_path_buf())
    }

    #[tokio::test]
    async fn fail_fast_returns_failed_without_compacting() {
        let dir = tempfile::tempdir().unwrap();
        let recovery = recovery_with_mode(ContextRecoveryMode::FailFast, dir.path());
        let summarizer = FixedSummarizer("s");
        let action = recovery.recover(&sample_history(), &summarizer, None, 1000).await.unwrap();
        assert!(matches!(action, RecoveryAction::Failed));
        assert_eq!(recovery.compactions_performed(), 0);
    }

    #[tokio::test]
    async fn compact_first_rebuilds_history_with_summary_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let recovery = recovery_with_mode(ContextRecoveryMode::CompactFirst, dir.path());
        let summarizer = FixedSummarizer("summary text");
        let action = recovery.recover(&sample_history(), &summarizer, None, 1000).await.unwrap();
        match action {
            RecoveryAction::Compacted(outcome) => {
                assert_eq!(outcome.history.len(), 1 + 2);
                assert_eq!(outcome.history[0].content.extract_all_text(), "summary text");
            }
            other => panic!("expected Compacted, got {other:?}"),
        }
        assert_eq!(recovery.compactions_performed(), 1);
    }

    #[tokio::test]
    async fn compaction_stops_at_max_compactions_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContextRecoveryConfig { max_compactions_per_run: 1, ..Default::default() };
        let recovery = ContextRecovery::new(config, dir.path().to_path_buf());
        let summarizer = FixedSummarizer("s");
        recovery.compact(&sample_history(), &summarizer).await.unwrap();
        let err = recovery.compact(&sample_history(), &summarizer).await.unwrap_err();
        assert!(matches!(err, EngineError::ContextRecovery(_)));
    }

    #[tokio::test]
    async fn ask_first_without_provider_falls_back_to_configured_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContextRecoveryConfig {
            mode: ContextRecoveryMode::AskFirst,
            ask_first_fallback_mode: ContextRecoveryMode::CompactFirst,
            compaction_keep_last_messages: 2,
            ..Default::default()
        };
        let recovery = ContextRecovery::new(config, dir.path().to_path_buf());
        let summarizer = FixedSummarizer("s");
        let action = recovery.recover(&sample_history(), &summarizer, None, 1000).await.unwrap();
        assert!(matches!(action, RecoveryAction::Compacted(_)));
    }

    #[tokio::test]
    async fn ask_first_honors_handoff_choice() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContextRecoveryConfig {
            mode: ContextRecoveryMode::AskFirst,
            compaction_keep_last_messages: 2,
            ..Default::default()
        };
        let recovery = ContextRecovery::new(config, dir.path().to_path_buf());
        let summarizer = FixedSummarizer("s");
        let human = FixedChoice(HumanChoice::HandoffNewRun);
        let action = recovery.recover(&sample_history(), &summarizer, Some(&human), 1000).await.unwrap();
        assert!(matches!(action, RecoveryAction::Handoff(_)));
    }

    #[tokio::test]
    async fn ask_first_honors_increase_budget_choice() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContextRecoveryConfig {
            mode: ContextRecoveryMode::AskFirst,
            compaction_keep_last_messages: 2,
            increase_budget_extra_steps: 25,
            ..Default::default()
        };
        let recovery = ContextRecovery::new(config, dir.path().to_path_buf());
        let summarizer = FixedSummarizer("s");
        let human = FixedChoice(HumanChoice::IncreaseBudgetContinue);
        let action = recovery.recover(&sample_history(), &summarizer, Some(&human), 1000).await.unwrap();
        match action {
            RecoveryAction::BudgetIncreased { extra_steps, .. } => assert_eq!(extra_steps, 25),
            other => panic!("expected BudgetIncreased, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ask_first_timeout_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContextRecoveryConfig {
            mode: ContextRecoveryMode::AskFirst,
            ask_first_fallback_mode: ContextRecoveryMode::FailFast,
            ..Default::default()
        };
        let recovery = ContextRecovery::new(config, dir.path().to_path_buf());
        let summarizer = FixedSummarizer("s");
        let human = NeverResponds;
        let action = recovery.recover(&sample_history(), &summarizer, Some(&human), 10).await.unwrap();
        assert!(matches!(action, RecoveryAction::Failed));
    }
}
