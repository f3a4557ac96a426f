use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ErrorKind, ToolResultPayload};

/// A single journaled event. One of these, serialized to a JSON line, is
/// the atomic unit of the WAL — see `sa_engine_wal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl Event {
    pub fn new(run_id: impl Into<String>, kind: EventKind) -> Self {
        Self { kind, timestamp: Utc::now(), run_id: run_id.into(), turn_id: None, step_id: None }
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// `true` for the three terminal event kinds. Every run emits exactly
    /// one, and it is the last event.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::RunCompleted(_) | EventKind::RunFailed(_) | EventKind::RunCancelled(_))
    }
}

/// The tagged event taxonomy. `type` is the tag, `payload` the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[allow(clippy::large_enum_variant)]
pub enum EventKind {
    #[serde(rename = "run_started")]
    RunStarted(RunStartedPayload),
    #[serde(rename = "llm_request_started")]
    LlmRequestStarted(LlmRequestStartedPayload),
    #[serde(rename = "text_delta")]
    TextDelta(TextDeltaPayload),
    #[serde(rename = "tool_calls")]
    ToolCalls(ToolCallsPayload),
    #[serde(rename = "tool_call_requested")]
    ToolCallRequested(ToolCallRequestedPayload),
    #[serde(rename = "tool_call_started")]
    ToolCallStarted(ToolCallStartedPayload),
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished(ToolCallFinishedPayload),
    #[serde(rename = "approval_requested")]
    ApprovalRequested(ApprovalRequestedPayload),
    #[serde(rename = "approval_decided")]
    ApprovalDecided(ApprovalDecidedPayload),
    #[serde(rename = "human_request")]
    HumanRequest(HumanRequestPayload),
    #[serde(rename = "human_response")]
    HumanResponse(HumanResponsePayload),
    #[serde(rename = "env_var_required")]
    EnvVarRequired(EnvVarPayload),
    #[serde(rename = "env_var_set")]
    EnvVarSet(EnvVarPayload),
    #[serde(rename = "skill_injected")]
    SkillInjected(SkillInjectedPayload),
    #[serde(rename = "skill_injection_skipped")]
    SkillInjectionSkipped(SkillInjectionSkippedPayload),
    #[serde(rename = "plan_updated")]
    PlanUpdated(PlanUpdatedPayload),
    #[serde(rename = "compaction_started")]
    CompactionStarted(CompactionStartedPayload),
    #[serde(rename = "context_length_exceeded")]
    ContextLengthExceeded(ContextLengthExceededPayload),
    #[serde(rename = "context_compacted")]
    ContextCompacted(ContextCompactedPayload),
    #[serde(rename = "compaction_finished")]
    CompactionFinished(CompactionFinishedPayload),
    #[serde(rename = "budget_increased")]
    BudgetIncreased(BudgetIncreasedPayload),
    #[serde(rename = "run_completed")]
    RunCompleted(RunCompletedPayload),
    #[serde(rename = "run_failed")]
    RunFailed(RunFailedPayload),
    #[serde(rename = "run_cancelled")]
    RunCancelled(RunCancelledPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResumeInfo {
    pub enabled: bool,
    pub strategy: String,
    pub previous_events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeInfo>,
    pub config_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequestStartedPayload {
    pub history_len: usize,
    pub tool_specs_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDeltaPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallsPayload {
    pub calls: Vec<SanitizedToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequestedPayload {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_arguments_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_arguments_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_arguments_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallStartedPayload {
    pub call_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFinishedPayload {
    pub call_id: String,
    pub tool: String,
    pub result: ToolResultPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestedPayload {
    pub approval_key: String,
    pub tool: String,
    pub summary: String,
    pub request: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecidedPayload {
    pub approval_key: String,
    pub decision: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanRequestPayload {
    pub prompt: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanResponsePayload {
    pub choice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarPayload {
    pub env_var: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInjectedPayload {
    pub mention_text: String,
    pub skill_name: String,
    pub namespace: String,
    pub locator: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInjectionSkippedPayload {
    pub mention_text: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanUpdatedPayload {
    pub plan: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionStartedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLengthExceededPayload {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCompactedPayload {
    pub reason: String,
    pub count: usize,
    pub artifact_path: String,
    pub summary_len: usize,
    pub summary_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionFinishedPayload {
    pub compactions_performed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetIncreasedPayload {
    pub extra_steps: u32,
    pub extra_wall_time_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub final_output: String,
    pub artifacts: Vec<String>,
    pub wal_locator: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailedPayload {
    pub error_kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub wal_locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCancelledPayload {
    pub message: String,
    pub wal_locator: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_completed_is_terminal() {
        let ev = Event::new(
            "r1",
            EventKind::RunCompleted(RunCompletedPayload {
                final_output: "ok".into(),
                artifacts: vec![],
                wal_locator: "x".into(),
                metadata: serde_json::json!({}),
            }),
        );
        assert!(ev.is_terminal());
    }

    #[test]
    fn text_delta_is_not_terminal() {
        let ev = Event::new("r1", EventKind::TextDelta(TextDeltaPayload { text: "hi".into() }));
        assert!(!ev.is_terminal());
    }

    #[test]
    fn event_round_trips_through_json() {
        let ev = Event::new("r1", EventKind::RunCancelled(RunCancelledPayload {
            message: "stopped".into(),
            wal_locator: "loc".into(),
        })).with_turn("turn_1");
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, "r1");
        assert_eq!(back.turn_id.as_deref(), Some("turn_1"));
        assert!(back.is_terminal());
    }
}
