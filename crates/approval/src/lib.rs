//! Async approval futures, per-run session cache, and timeout handling (C4).

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::RwLock;
use sa_engine_domain::{ApprovalDecision, ApprovalRecord, ApprovalRequest};

/// Thin adapter to an external decider: policy engine, human UI, or
/// scripted test provider. The hub itself holds no UI state.
#[async_trait::async_trait]
pub trait ApprovalProvider: Send + Sync {
    async fn decide(&self, req: &ApprovalRequest) -> ApprovalDecision;
}

/// Why a decision was reached, mirroring `approval_decided.reason` in the
/// WAL schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Cached,
    Provider,
    Timeout,
    NoProvider,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Cached => "cached",
            DecisionReason::Provider => "provider",
            DecisionReason::Timeout => "timeout",
            DecisionReason::NoProvider => "no_provider",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub decision: ApprovalDecision,
    pub reason: DecisionReason,
}

/// Per-run approval state: a session cache of `approval_key`s approved
/// `APPROVED_FOR_SESSION`, keyed by `run_id` at construction so state never
/// leaks across runs.
pub struct ApprovalHub {
    run_id: String,
    session_cache: RwLock<HashSet<String>>,
    records: RwLock<Vec<ApprovalRecord>>,
}

impl ApprovalHub {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into(), session_cache: RwLock::new(HashSet::new()), records: RwLock::new(Vec::new()) }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Every resolved request this run, in resolution order.
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.records.read().clone()
    }

    /// `true` if this request is already covered by a prior
    /// `APPROVED_FOR_SESSION` decision — the dispatcher must skip emitting
    /// `approval_requested`/`approval_decided` in that case.
    pub fn is_cached(&self, approval_key: &str) -> bool {
        self.session_cache.read().contains(approval_key)
    }

    /// Resolve one approval request. On timeout the hub resolves to
    /// `DENIED`. Denials never populate the session cache.
    pub async fn request_approval(
        &self,
        req: &ApprovalRequest,
        provider: Option<&dyn ApprovalProvider>,
        timeout_ms: u64,
    ) -> Resolution {
        let approval_key = req.approval_key();

        if self.is_cached(&approval_key) {
            return Resolution { decision: ApprovalDecision::ApprovedForSession, reason: DecisionReason::Cached };
        }

        let Some(provider) = provider else {
            return Resolution { decision: ApprovalDecision::Denied, reason: DecisionReason::NoProvider };
        };

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), provider.decide(req)).await;

        let resolution = match outcome {
            Ok(decision) => Resolution { decision, reason: DecisionReason::Provider },
            Err(_elapsed) => {
                tracing::warn!(approval_key = %approval_key, "approval timed out");
                Resolution { decision: ApprovalDecision::Denied, reason: DecisionReason::Timeout }
            }
        };

        if resolution.decision == ApprovalDecision::ApprovedForSession {
            self.session_cache.write().insert(approval_key.clone());
        }

        self.records.write().push(ApprovalRecord {
            approval_key,
            tool: req.tool.clone(),
            summary: req.summary.clone(),
            details: req.sanitized_request.clone(),
            decided_at: Some(chrono::Utc::now()),
            decision: Some(resolution.decision),
        });

        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(ApprovalDecision);
    #[async_trait::async_trait]
    impl ApprovalProvider for FixedProvider {
        async fn decide(&self, _req: &ApprovalRequest) -> ApprovalDecision {
            self.0
        }
    }

    struct NeverRespondsProvider;
    #[async_trait::async_trait]
    impl ApprovalProvider for NeverRespondsProvider {
        async fn decide(&self, _req: &ApprovalRequest) -> ApprovalDecision {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn sample_request() -> ApprovalRequest {
        ApprovalRequest {
            tool: "file_write".into(),
            summary: "write a.txt".into(),
            sanitized_request: serde_json::json!({"path": "a.txt"}),
        }
    }

    #[tokio::test]
    async fn approved_for_session_populates_cache() {
        let hub = ApprovalHub::new("r1");
        let req = sample_request();
        let provider = FixedProvider(ApprovalDecision::ApprovedForSession);
        let res = hub.request_approval(&req, Some(&provider), 1000).await;
        assert_eq!(res.decision, ApprovalDecision::ApprovedForSession);
        assert_eq!(res.reason, DecisionReason::Provider);
        assert!(hub.is_cached(&req.approval_key()));
    }

    #[tokio::test]
    async fn cached_request_short_circuits_without_provider() {
        let hub = ApprovalHub::new("r1");
        let req = sample_request();
        let provider = FixedProvider(ApprovalDecision::ApprovedForSession);
        hub.request_approval(&req, Some(&provider), 1000).await;

        // Second identical request: provider must not be consulted again —
        // use a never-respond provider to prove the cache short-circuits.
        let never = NeverRespondsProvider;
        let res = hub.request_approval(&req, Some(&never), 1000).await;
        assert_eq!(res.decision, ApprovalDecision::ApprovedForSession);
        assert_eq!(res.reason, DecisionReason::Cached);
    }

    #[tokio::test]
    async fn denied_does_not_populate_cache() {
        let hub = ApprovalHub::new("r1");
        let req = sample_request();
        let provider = FixedProvider(ApprovalDecision::Denied);
        hub.request_approval(&req, Some(&provider), 1000).await;
        assert!(!hub.is_cached(&req.approval_key()));
    }

    #[tokio::test]
    async fn timeout_resolves_to_denied() {
        let hub = ApprovalHub::new("r1");
        let req = sample_request();
        let never = NeverRespondsProvider;
        let res = hub.request_approval(&req, Some(&never), 10).await;
        assert_eq!(res.decision, ApprovalDecision::Denied);
        assert_eq!(res.reason, DecisionReason::Timeout);
    }

    #[tokio::test]
    async fn resolved_requests_are_recorded_in_order() {
        let hub = ApprovalHub::new("r1");
        let req = sample_request();
        let provider = FixedProvider(ApprovalDecision::Denied);
        hub.request_approval(&req, Some(&provider), 1000).await;
        let records = hub.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tool, "file_write");
        assert_eq!(records[0].decision, Some(ApprovalDecision::Denied));
        assert!(records[0].decided_at.is_some());
    }

    #[tokio::test]
    async fn missing_provider_denies_with_no_provider_reason() {
        let hub = ApprovalHub::new("r1");
        let req = sample_request();
        let res = hub.request_approval(&req, None, 1000).await;
        assert_eq!(res.decision, ApprovalDecision::Denied);
        assert_eq!(res.reason, DecisionReason::NoProvider);
    }
}
