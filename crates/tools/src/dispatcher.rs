use std::sync::Arc;
use std::time::Instant;

use sa_engine_approval::{ApprovalHub, ApprovalProvider};
use sa_engine_domain::event::{
    ApprovalDecidedPayload, ApprovalRequestedPayload, Event, EventKind, ToolCallFinishedPayload,
    ToolCallRequestedPayload, ToolCallStartedPayload,
};
use sa_engine_domain::{ApprovalDecision, ApprovalRequest, ErrorKind, EventSink, ToolCall, ToolResult, ToolResultPayload};
use sa_engine_safety::gate::{Action, GateRequest, SandboxPermission, SafetyGate};
use sa_engine_safety::redact::{redact_text, sanitize_args};

use crate::context::ExecutionContext;
use crate::registry::ToolRegistry;

/// Implements the seven-step tool dispatch algorithm: emit request, validate
/// arguments, consult the Safety Gate, resolve approval if asked, emit
/// started, invoke the handler, redact and emit finished.
pub struct Dispatcher {
    pub registry: Arc<ToolRegistry>,
    pub gate: SafetyGate,
    pub approval_hub: Arc<ApprovalHub>,
    pub approval_provider: Option<Arc<dyn ApprovalProvider>>,
    pub approval_timeout_ms: u64,
    pub known_secrets: Vec<String>,
}

/// Whether a call should short-circuit before the handler runs, and why —
/// callers (the agent loop) use this to decide whether to bump the
/// per-approval-key denial count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed,
    DeniedByGate,
    DeniedByApproval,
    /// The gate asked but no `ApprovalProvider` is configured. The loop must
    /// fail the run with `config_error` — never silently allow.
    DeniedNoProvider,
    AbortedByApproval,
    InvalidArguments,
    UnknownTool,
}

pub struct DispatchResult {
    pub result: ToolResult,
    pub outcome: DispatchOutcome,
    /// Set only when the outcome went through the approval path — the key
    /// the caller should feed to `Budget::record_denial` on denial/abort.
    pub approval_key: Option<String>,
}

fn shell_like_argv(tool_name: &str, args: &serde_json::Value) -> Option<Vec<String>> {
    match tool_name {
        "shell_exec" => args.get("command").and_then(|v| v.as_str()).map(|c| vec!["sh".to_string(), "-c".to_string(), c.to_string()]),
        "exec_command" => args.get("argv").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()),
        _ => None,
    }
}

impl Dispatcher {
    pub async fn dispatch(
        &self,
        call: ToolCall,
        ctx: Arc<ExecutionContext>,
        sink: &dyn EventSink,
        run_id: &str,
        turn_id: &str,
        step_id: &str,
        sandbox: SandboxPermission,
    ) -> DispatchResult {
        let start = Instant::now();
        let sanitized_args = sanitize_args(&call.name, &call.args, &ctx.known_secrets);

        sink.emit(
            Event::new(
                run_id,
                EventKind::ToolCallRequested(ToolCallRequestedPayload {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    arguments: sanitized_args.clone(),
                    arguments_valid: Some(call.arguments_valid()),
                    raw_arguments_len: call.raw_arguments_len(),
                    raw_arguments_sha256: call.raw_arguments_sha256(),
                    raw_arguments_error: if call.arguments_valid() { None } else { Some("raw arguments did not parse to a JSON object".into()) },
                }),
            )
            .with_turn(turn_id)
            .with_step(step_id),
        );

        if !call.arguments_valid() {
            let result = finish(sink, run_id, turn_id, step_id, &call, ToolResultPayload::err(ErrorKind::Validation, "invalid tool call arguments", start.elapsed().as_millis() as u64));
            return DispatchResult { result, outcome: DispatchOutcome::InvalidArguments, approval_key: None };
        }

        if self.registry.get_spec(&call.name).is_none() {
            let result = finish(sink, run_id, turn_id, step_id, &call, ToolResultPayload::err(ErrorKind::NotFound, format!("unknown tool '{}'", call.name), start.elapsed().as_millis() as u64));
            return DispatchResult { result, outcome: DispatchOutcome::UnknownTool, approval_key: None };
        }

        let argv = shell_like_argv(&call.name, &call.args);
        let gate_req = GateRequest { tool_name: &call.name, argv: argv.as_deref(), sandbox };
        let decision = self.gate.decide(&gate_req);

        if decision.action == Action::Deny {
            let result = finish(
                sink,
                run_id,
                turn_id,
                step_id,
                &call,
                ToolResultPayload::err(ErrorKind::Permission, format!("denied: {}", decision.reason), start.elapsed().as_millis() as u64),
            );
            return DispatchResult { result, outcome: DispatchOutcome::DeniedByGate, approval_key: None };
        }

        let mut approval_key = None;
        if decision.action == Action::Ask {
            let approval_req = ApprovalRequest {
                tool: call.name.clone(),
                summary: format!("{} requests approval: {}", call.name, decision.reason),
                sanitized_request: sanitized_args.clone(),
            };
            let key = approval_req.approval_key();
            approval_key = Some(key.clone());
            let already_cached = self.approval_hub.is_cached(&key);

            if !already_cached {
                sink.emit(
                    Event::new(
                        run_id,
                        EventKind::ApprovalRequested(ApprovalRequestedPayload {
                            approval_key: key.clone(),
                            tool: call.name.clone(),
                            summary: approval_req.summary.clone(),
                            request: sanitized_args.clone(),
                        }),
                    )
                    .with_turn(turn_id)
                    .with_step(step_id),
                );
            }

            let resolution = self
                .approval_hub
                .request_approval(&approval_req, self.approval_provider.as_deref(), self.approval_timeout_ms)
                .await;

            if !already_cached {
                sink.emit(
                    Event::new(
                        run_id,
                        EventKind::ApprovalDecided(ApprovalDecidedPayload {
                            approval_key: key.clone(),
                            decision: resolution.decision.as_str().to_string(),
                            reason: resolution.reason.as_str().to_string(),
                        }),
                    )
                    .with_turn(turn_id)
                    .with_step(step_id),
                );
            }

            if !resolution.decision.is_approved() {
                let outcome = if resolution.decision == ApprovalDecision::Abort {
                    DispatchOutcome::AbortedByApproval
                } else if resolution.reason == sa_engine_approval::DecisionReason::NoProvider {
                    DispatchOutcome::DeniedNoProvider
                } else {
                    DispatchOutcome::DeniedByApproval
                };
                let result = finish(
                    sink,
                    run_id,
                    turn_id,
                    step_id,
                    &call,
                    ToolResultPayload::err(ErrorKind::Permission, format!("approval {}", resolution.decision.as_str()), start.elapsed().as_millis() as u64),
                );
                return DispatchResult { result, outcome, approval_key };
            }
        }

        sink.emit(
            Event::new(run_id, EventKind::ToolCallStarted(ToolCallStartedPayload { call_id: call.call_id.clone(), name: call.name.clone() }))
                .with_turn(turn_id)
                .with_step(step_id),
        );

        let handler = self.registry.get_handler(&call.name).expect("spec presence checked above");
        let handler_result = handler(call.clone(), ctx).await;
        let redacted = redact_tool_result(handler_result, &self.known_secrets);

        let result = finish_with_result(sink, run_id, turn_id, step_id, &call, redacted);
        DispatchResult { result, outcome: DispatchOutcome::Executed, approval_key }
    }
}

fn redact_tool_result(result: ToolResult, known_secrets: &[String]) -> ToolResult {
    if known_secrets.is_empty() {
        return result;
    }
    let Ok(mut payload) = serde_json::from_str::<ToolResultPayload>(&result.content) else {
        return result;
    };
    payload.stdout = redact_text(&payload.stdout, known_secrets);
    payload.stderr = redact_text(&payload.stderr, known_secrets);
    ToolResult::from_payload(&payload)
}

fn finish(sink: &dyn EventSink, run_id: &str, turn_id: &str, step_id: &str, call: &ToolCall, payload: ToolResultPayload) -> ToolResult {
    finish_with_result(sink, run_id, turn_id, step_id, call, ToolResult::from_payload(&payload))
}

fn finish_with_result(sink: &dyn EventSink, run_id: &str, turn_id: &str, step_id: &str, call: &ToolCall, result: ToolResult) -> ToolResult {
    let payload: ToolResultPayload = serde_json::from_str(&result.content).unwrap_or_else(|_| {
        ToolResultPayload::err(ErrorKind::Unknown, "result payload did not deserialize", 0)
    });
    sink.emit(
        Event::new(run_id, EventKind::ToolCallFinished(ToolCallFinishedPayload { call_id: call.call_id.clone(), tool: call.name.clone(), result: payload }))
            .with_turn(turn_id)
            .with_step(step_id),
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_engine_domain::config::SafetyConfig;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<Event>>);
    impl EventSink for RecordingSink {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    struct AlwaysApprove;
    #[async_trait::async_trait]
    impl ApprovalProvider for AlwaysApprove {
        async fn decide(&self, _req: &ApprovalRequest) -> ApprovalDecision {
            ApprovalDecision::ApprovedOnce
        }
    }

    struct AlwaysDeny;
    #[async_trait::async_trait]
    impl ApprovalProvider for AlwaysDeny {
        async fn decide(&self, _req: &ApprovalRequest) -> ApprovalDecision {
            ApprovalDecision::Denied
        }
    }

    fn dispatcher_with(config: SafetyConfig, provider: Option<Arc<dyn ApprovalProvider>>) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        crate::handlers::register_builtin_tools(&mut registry).unwrap();
        Dispatcher {
            registry: Arc::new(registry),
            gate: SafetyGate::new(config),
            approval_hub: Arc::new(ApprovalHub::new("r1")),
            approval_provider: provider,
            approval_timeout_ms: 1000,
            known_secrets: vec![],
        }
    }

    fn event_types(sink: &RecordingSink) -> Vec<String> {
        sink.0
            .lock()
            .unwrap()
            .iter()
            .map(|e| match &e.kind {
                EventKind::ToolCallRequested(_) => "tool_call_requested",
                EventKind::ToolCallStarted(_) => "tool_call_started",
                EventKind::ToolCallFinished(_) => "tool_call_finished",
                EventKind::ApprovalRequested(_) => "approval_requested",
                EventKind::ApprovalDecided(_) => "approval_decided",
                _ => "other",
            }
            .to_string())
            .collect()
    }

    #[tokio::test]
    async fn deny_mode_short_circuits_without_invoking_handler() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SafetyConfig::default();
        cfg.mode = sa_engine_domain::config::SafetyMode::Deny;
        let dispatcher = dispatcher_with(cfg, None);
        let sink = RecordingSink(Mutex::new(vec![]));
        let ctx = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));

        let outcome = dispatcher.dispatch(call, ctx, &sink, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;
        assert_eq!(outcome.outcome, DispatchOutcome::DeniedByGate);
        assert!(!outcome.result.ok);
        assert_eq!(event_types(&sink), vec!["tool_call_requested", "tool_call_finished"]);
    }

    #[tokio::test]
    async fn invalid_arguments_short_circuit_before_gate() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with(SafetyConfig::default(), None);
        let sink = RecordingSink(Mutex::new(vec![]));
        let ctx = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call = ToolCall::from_raw("c1", "read_file", Some("not json".into()));

        let outcome = dispatcher.dispatch(call, ctx, &sink, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;
        assert_eq!(outcome.outcome, DispatchOutcome::InvalidArguments);
    }

    #[tokio::test]
    async fn ask_with_approval_denied_short_circuits_without_invoking_handler() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SafetyConfig::default();
        cfg.mode = sa_engine_domain::config::SafetyMode::Ask;
        let dispatcher = dispatcher_with(cfg, Some(Arc::new(AlwaysDeny)));
        let sink = RecordingSink(Mutex::new(vec![]));
        let ctx = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));

        let outcome = dispatcher.dispatch(call, ctx, &sink, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;
        assert_eq!(outcome.outcome, DispatchOutcome::DeniedByApproval);
        assert!(outcome.approval_key.is_some());
        assert!(event_types(&sink).contains(&"approval_requested".to_string()));
    }

    #[tokio::test]
    async fn ask_without_provider_is_denied_no_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SafetyConfig::default();
        cfg.mode = sa_engine_domain::config::SafetyMode::Ask;
        let dispatcher = dispatcher_with(cfg, None);
        let sink = RecordingSink(Mutex::new(vec![]));
        let ctx = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));

        let outcome = dispatcher.dispatch(call, ctx, &sink, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;
        assert_eq!(outcome.outcome, DispatchOutcome::DeniedNoProvider);
    }

    #[tokio::test]
    async fn ask_with_approval_granted_invokes_handler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let mut cfg = SafetyConfig::default();
        cfg.mode = sa_engine_domain::config::SafetyMode::Ask;
        let dispatcher = dispatcher_with(cfg, Some(Arc::new(AlwaysApprove)));
        let sink = RecordingSink(Mutex::new(vec![]));
        let ctx = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));

        let outcome = dispatcher.dispatch(call, ctx, &sink, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;
        assert_eq!(outcome.outcome, DispatchOutcome::Executed);
        assert_eq!(event_types(&sink), vec!["tool_call_requested", "approval_requested", "approval_decided", "tool_call_started", "tool_call_finished"]);
    }

    #[tokio::test]
    async fn cached_approval_skips_request_and_decided_events() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let mut cfg = SafetyConfig::default();
        cfg.mode = sa_engine_domain::config::SafetyMode::Ask;
        let dispatcher = dispatcher_with(cfg, Some(Arc::new(AlwaysApprove)));

        let sink1 = RecordingSink(Mutex::new(vec![]));
        let ctx1 = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call1 = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));
        dispatcher.dispatch(call1, ctx1, &sink1, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;

        let sink2 = RecordingSink(Mutex::new(vec![]));
        let ctx2 = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call2 = ToolCall::from_raw("c2", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));
        dispatcher.dispatch(call2, ctx2, &sink2, "r1", "turn_2", "step_2", SandboxPermission::Normal).await;

        assert_eq!(event_types(&sink2), vec!["tool_call_requested", "tool_call_started", "tool_call_finished"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with(SafetyConfig::default(), None);
        let sink = RecordingSink(Mutex::new(vec![]));
        let ctx = Arc::new(ExecutionContext::new(dir.path().to_path_buf()));
        let call = ToolCall::from_raw("c1", "no_such_tool", None);

        let outcome = dispatcher.dispatch(call, ctx, &sink, "r1", "turn_1", "step_1", SandboxPermission::Normal).await;
        assert_eq!(outcome.outcome, DispatchOutcome::UnknownTool);
    }
}
