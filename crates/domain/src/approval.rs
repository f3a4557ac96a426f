use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a reviewer (human, policy engine, or scripted test provider)
/// decided about a pending approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    ApprovedOnce,
    ApprovedForSession,
    Denied,
    Abort,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::ApprovedOnce => "approved_once",
            ApprovalDecision::ApprovedForSession => "approved_for_session",
            ApprovalDecision::Denied => "denied",
            ApprovalDecision::Abort => "abort",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::ApprovedOnce | ApprovalDecision::ApprovedForSession)
    }
}

/// A request for approval, built from a sanitized (redacted) tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool: String,
    pub summary: String,
    pub sanitized_request: serde_json::Value,
}

impl ApprovalRequest {
    /// Deterministic fingerprint over `(tool, canonicalized sanitized
    /// request)` so identical requests share a cache entry.
    pub fn approval_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tool.as_bytes());
        hasher.update(b"\0");
        // serde_json::Value's Display impl serializes in a stable key order
        // only when the map preserves insertion order identically across
        // calls; canonicalize by round-tripping through a sorted-keys map.
        let canonical = canonicalize(&self.sanitized_request);
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted: std::collections::BTreeMap<String, serde_json::Value> = Default::default();
                for (k, v) in map {
                    sorted.insert(k.clone(), sort(v));
                }
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Full record of a resolved approval, as retained by the per-run session
/// cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_key: String,
    pub tool: String,
    pub summary: String,
    pub details: serde_json::Value,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision: Option<ApprovalDecision>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_key_is_stable_regardless_of_key_order() {
        let a = ApprovalRequest {
            tool: "file_write".into(),
            summary: "write a.txt".into(),
            sanitized_request: serde_json::json!({"path": "a.txt", "bytes": 5}),
        };
        let b = ApprovalRequest {
            tool: "file_write".into(),
            summary: "write a.txt".into(),
            sanitized_request: serde_json::json!({"bytes": 5, "path": "a.txt"}),
        };
        assert_eq!(a.approval_key(), b.approval_key());
    }

    #[test]
    fn approval_key_differs_on_content() {
        let a = ApprovalRequest {
            tool: "file_write".into(),
            summary: "write a.txt".into(),
            sanitized_request: serde_json::json!({"path": "a.txt"}),
        };
        let b = ApprovalRequest {
            tool: "file_write".into(),
            summary: "write b.txt".into(),
            sanitized_request: serde_json::json!({"path": "b.txt"}),
        };
        assert_ne!(a.approval_key(), b.approval_key());
    }

    #[test]
    fn decision_is_approved() {
        assert!(ApprovalDecision::ApprovedOnce.is_approved());
        assert!(ApprovalDecision::ApprovedForSession.is_approved());
        assert!(!ApprovalDecision::Denied.is_approved());
        assert!(!ApprovalDecision::Abort.is_approved());
    }
}
