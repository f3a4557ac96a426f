use sa_engine_domain::tool::ErrorKind;

/// Terminal disposition of a run, mirroring the three terminal event kinds
/// a run emits exactly one of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub final_output: String,
    pub wal_locator: String,
    pub metadata: serde_json::Value,
    pub error_kind: Option<ErrorKind>,
}

impl RunResult {
    pub fn completed(final_output: impl Into<String>, wal_locator: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self { status: RunStatus::Completed, final_output: final_output.into(), wal_locator: wal_locator.into(), metadata, error_kind: None }
    }

    pub fn failed(message: impl Into<String>, error_kind: ErrorKind, wal_locator: impl Into<String>) -> Self {
        Self { status: RunStatus::Failed, final_output: message.into(), wal_locator: wal_locator.into(), metadata: serde_json::json!({}), error_kind: Some(error_kind) }
    }

    pub fn cancelled(message: impl Into<String>, wal_locator: impl Into<String>) -> Self {
        Self { status: RunStatus::Cancelled, final_output: message.into(), wal_locator: wal_locator.into(), metadata: serde_json::json!({}), error_kind: None }
    }
}
