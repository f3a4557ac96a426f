/// Internal engine error type. Distinct from [`crate::tool::ErrorKind`], the
/// closed, serializable taxonomy attached to tool results and events that
/// crosses the WAL boundary — this one never leaves the process.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    #[error("skill error: {0}")]
    Skill(String),

    #[error("feature disabled: {0}")]
    Disabled(String),

    #[error("context recovery failed: {0}")]
    ContextRecovery(String),

    #[error("chat backend: {0}")]
    ChatBackend(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
