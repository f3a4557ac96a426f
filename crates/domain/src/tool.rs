use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A tool call emitted by the model. `raw_arguments` preserves the exact
/// JSON string the model emitted (for event fidelity) even when `args`
/// falls back to `{}` on parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub raw_arguments: Option<String>,
}

impl ToolCall {
    /// Parse `raw_arguments` into `args`. A call with no raw string, or whose
    /// raw string is a valid JSON object, is "valid". A non-object JSON value
    /// or malformed JSON is not — dispatch must fail closed in that case.
    pub fn from_raw(call_id: impl Into<String>, name: impl Into<String>, raw_arguments: Option<String>) -> Self {
        let raw = raw_arguments;
        let parsed = raw.as_deref().and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok());
        let args = match &parsed {
            Some(v) if v.is_object() => v.clone(),
            _ => serde_json::json!({}),
        };
        Self { call_id: call_id.into(), name: name.into(), args, raw_arguments: raw }
    }

    /// `true` if there were no raw arguments, or the raw arguments parsed to
    /// a JSON object.
    pub fn arguments_valid(&self) -> bool {
        match &self.raw_arguments {
            None => true,
            Some(s) => matches!(serde_json::from_str::<serde_json::Value>(s), Ok(v) if v.is_object()),
        }
    }

    pub fn raw_arguments_len(&self) -> Option<usize> {
        self.raw_arguments.as_ref().map(|s| s.len())
    }

    pub fn raw_arguments_sha256(&self) -> Option<String> {
        self.raw_arguments.as_ref().map(|s| {
            let mut hasher = Sha256::new();
            hasher.update(s.as_bytes());
            hex::encode(hasher.finalize())
        })
    }
}

/// Idempotency classification used by the Safety Gate's risk evaluator and
/// by callers that want to know whether a retry is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Idempotency {
    Safe,
    Unsafe,
    Unknown,
}

/// A tool's advertised contract: what the model sees, plus engine-only
/// metadata (`requires_approval`, `idempotency`) used by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub requires_approval: bool,
    pub idempotency: Idempotency,
}

/// The closed error taxonomy surfaced on `ToolResultPayload.error_kind` and
/// `run_failed.error_kind`. Every tool handler failure and every loop-level
/// failure maps onto one of these. The last three are run-level only: they
/// never appear on a tool result, only on `run_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Permission,
    NotFound,
    Timeout,
    ExitCode,
    Cancelled,
    HumanRequired,
    ConfigError,
    SandboxDenied,
    Unknown,
    BudgetExceeded,
    ApprovalDenied,
    ContextLengthExceeded,
}

/// The canonical result body a tool handler produces. `data` carries any
/// handler-specific structured payload (e.g. `read_file`'s line listing);
/// `content` on [`ToolResult`] is this struct serialized to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ToolResultPayload {
    pub fn ok(stdout: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            ok: true,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms,
            truncated: false,
            data: serde_json::Value::Null,
            error_kind: None,
            retryable: false,
            retry_after_ms: None,
        }
    }

    pub fn err(error_kind: ErrorKind, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            duration_ms,
            truncated: false,
            data: serde_json::Value::Null,
            error_kind: Some(error_kind),
            retryable: matches!(error_kind, ErrorKind::Timeout),
            retry_after_ms: None,
        }
    }
}

/// The wire-level envelope the dispatcher appends to conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn from_payload(payload: &ToolResultPayload) -> Self {
        Self {
            ok: payload.ok,
            content: serde_json::to_string(payload).unwrap_or_else(|_| "{}".into()),
            error_kind: payload.error_kind,
            message: if payload.ok { None } else { Some(payload.stderr.clone()) },
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_valid_object() {
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));
        assert!(call.arguments_valid());
        assert_eq!(call.args["file_path"], "a.txt");
    }

    #[test]
    fn from_raw_malformed_falls_back_to_empty_object() {
        let call = ToolCall::from_raw("c1", "read_file", Some("not json".into()));
        assert!(!call.arguments_valid());
        assert_eq!(call.args, serde_json::json!({}));
    }

    #[test]
    fn from_raw_non_object_json_is_invalid() {
        let call = ToolCall::from_raw("c1", "read_file", Some("[1,2,3]".into()));
        assert!(!call.arguments_valid());
        assert_eq!(call.args, serde_json::json!({}));
    }

    #[test]
    fn from_raw_none_is_valid() {
        let call = ToolCall::from_raw("c1", "list_dir", None);
        assert!(call.arguments_valid());
        assert_eq!(call.raw_arguments_len(), None);
    }

    #[test]
    fn raw_arguments_sha256_is_stable() {
        let call = ToolCall::from_raw("c1", "x", Some("{}".into()));
        assert_eq!(call.raw_arguments_sha256().unwrap().len(), 64);
    }
}
