//! The agent loop: drives a run from a task string to exactly one terminal
//! event, composing the WAL emitter, dispatcher, safety gate, approval hub,
//! skills manager, loop controller, and context recovery around an abstract
//! `ChatBackend`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use sa_engine_approval::ApprovalHub;
use sa_engine_context::{ContextRecovery, RecoveryAction};
use sa_engine_domain::config::{Config, ContextRecoveryMode, EnvVarMissingPolicy, ResumeStrategy, SandboxPolicy};
use sa_engine_domain::event::{
    BudgetIncreasedPayload, CompactionFinishedPayload, CompactionStartedPayload, ContextCompactedPayload,
    ContextLengthExceededPayload, EnvVarPayload, Event, EventKind, HumanRequestPayload, HumanResponsePayload,
    LlmRequestStartedPayload, PlanUpdatedPayload, ResumeInfo, RunCancelledPayload, RunCompletedPayload,
    RunFailedPayload, RunStartedPayload, SanitizedToolCall, SkillInjectedPayload, SkillInjectionSkippedPayload,
    TextDeltaPayload, ToolCallsPayload,
};
use sa_engine_domain::tool::ErrorKind;
use sa_engine_domain::{
    ChatBackend, ChatRequest, ContentPart, EngineError, EnvStore, FinishReason, Message, RawToolCall, Result,
    RunContext, Skill, StreamEvent, ToolCall,
};
use sa_engine_exec::{Executor, InProcessExecutor};
use sa_engine_loop::{BudgetError, LoopController, DEFAULT_DENIAL_ABORT_THRESHOLD};
use sa_engine_safety::gate::{SafetyGate, SandboxPermission};
use sa_engine_safety::redact::sanitize_args;
use sa_engine_skills::{EnvVarOutcome, SkillError, SkillsManager};
use sa_engine_tools::{
    register_builtin_tools, DispatchOutcome, Dispatcher, ExecutionContext, HumanIoProvider, ToolRegistry,
    WebSearchProvider,
};
use sa_engine_wal::{replay_lines, FileWalBackend, WalEmitter};
use sha2::{Digest, Sha256};
use tracing::Instrument;

use crate::prompt::{build_developer_message, build_system_message, cap_history};
use crate::recovery_adapters::{ChatBackendSummarizer, HumanIoChoiceAdapter};
use crate::result::RunResult;
use crate::skill_access::SkillAccessAdapter;
use crate::spawner::NestedRunRegistry;

/// Where run state lands under the workspace:
/// `<workspace>/<RUNTIME_DIR>/runs/<run_id>/events.jsonl`.
pub const RUNTIME_DIR: &str = ".agent-runtime";

/// Per-invocation knobs beyond the task string. `run_id` defaults to a
/// fresh UUID; `resume` is set by [`Agent::resume_forked`] and carried into
/// the `run_started` event verbatim; `cancel` lets the caller keep a
/// cooperative cancellation handle for the run.
#[derive(Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    pub initial_history: Option<Vec<Message>>,
    pub resume: Option<ResumeInfo>,
    pub cancel: Option<sa_engine_loop::CancelToken>,
}

pub struct AgentBuilder {
    config: Config,
    workspace_root: PathBuf,
    backend: Option<Arc<dyn ChatBackend>>,
    skills: Option<Arc<SkillsManager>>,
    approval_provider: Option<Arc<dyn sa_engine_approval::ApprovalProvider>>,
    human_io: Option<Arc<dyn HumanIoProvider>>,
    web_search: Option<Arc<dyn WebSearchProvider>>,
    executor: Option<Arc<dyn Executor>>,
    exec_sessions: Option<Arc<dyn sa_engine_exec::ExecSessions>>,
    extra_tools: Vec<(sa_engine_domain::ToolSpec, sa_engine_tools::Handler)>,
    env_provided: HashMap<String, String>,
}

impl AgentBuilder {
    pub fn new(config: Config, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace_root: workspace_root.into(),
            backend: None,
            skills: None,
            approval_provider: None,
            human_io: None,
            web_search: None,
            executor: None,
            exec_sessions: None,
            extra_tools: Vec::new(),
            env_provided: HashMap::new(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn skills(mut self, skills: Arc<SkillsManager>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn approval_provider(mut self, provider: Arc<dyn sa_engine_approval::ApprovalProvider>) -> Self {
        self.approval_provider = Some(provider);
        self
    }

    pub fn human_io(mut self, provider: Arc<dyn HumanIoProvider>) -> Self {
        self.human_io = Some(provider);
        self
    }

    pub fn web_search(mut self, provider: Arc<dyn WebSearchProvider>) -> Self {
        self.web_search = Some(provider);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn exec_sessions(mut self, sessions: Arc<dyn sa_engine_exec::ExecSessions>) -> Self {
        self.exec_sessions = Some(sessions);
        self
    }

    /// Register a custom tool alongside the built-ins. Duplicate names are
    /// rejected at `build` time.
    pub fn tool(mut self, spec: sa_engine_domain::ToolSpec, handler: sa_engine_tools::Handler) -> Self {
        self.extra_tools.push((spec, handler));
        self
    }

    /// Run-provided env var overrides, consulted after the process env when
    /// resolving a skill's `required_env_vars`.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env_provided = env;
        self
    }

    pub fn build(self) -> Result<Arc<Agent>> {
        let backend = self.backend.ok_or_else(|| EngineError::Config("a ChatBackend is required".into()))?;
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry).map_err(|e| EngineError::Config(e.to_string()))?;
        for (spec, handler) in self.extra_tools {
            registry.register(spec, handler, false).map_err(|e| EngineError::Config(e.to_string()))?;
        }
        let executor: Arc<dyn Executor> = self.executor.unwrap_or_else(|| Arc::new(InProcessExecutor::new()));

        Ok(Arc::new_cyclic(|weak| Agent {
            config: self.config,
            workspace_root: self.workspace_root,
            backend,
            registry: Arc::new(registry),
            skills: self.skills,
            approval_provider: self.approval_provider,
            human_io: self.human_io,
            web_search: self.web_search,
            executor,
            exec_sessions: self.exec_sessions,
            env_provided: self.env_provided,
            spawner: NestedRunRegistry::new(weak.clone()),
        }))
    }
}

pub struct Agent {
    config: Config,
    workspace_root: PathBuf,
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    skills: Option<Arc<SkillsManager>>,
    approval_provider: Option<Arc<dyn sa_engine_approval::ApprovalProvider>>,
    human_io: Option<Arc<dyn HumanIoProvider>>,
    web_search: Option<Arc<dyn WebSearchProvider>>,
    executor: Arc<dyn Executor>,
    exec_sessions: Option<Arc<dyn sa_engine_exec::ExecSessions>>,
    env_provided: HashMap<String, String>,
    spawner: NestedRunRegistry,
}

impl Agent {
    pub fn builder(config: Config, workspace_root: impl Into<PathBuf>) -> AgentBuilder {
        AgentBuilder::new(config, workspace_root)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace_root(&self) -> &std::path::Path {
        &self.workspace_root
    }

    /// Drive a run to its terminal event and return the summary.
    pub async fn run(
        self: &Arc<Self>,
        task: impl Into<String>,
        run_id: Option<String>,
        initial_history: Option<Vec<Message>>,
    ) -> Result<RunResult> {
        self.run_with_options(task, RunOptions { run_id, initial_history, resume: None, cancel: None }, None).await
    }

    /// Like [`Agent::run`], with full control of the run options.
    pub async fn run_opts(self: &Arc<Self>, task: impl Into<String>, options: RunOptions) -> Result<RunResult> {
        self.run_with_options(task, options, None).await
    }

    /// Synchronous facade over [`Agent::run`] for callers without a tokio
    /// runtime of their own. Must not be invoked from within one.
    pub fn run_blocking(
        self: &Arc<Self>,
        task: impl Into<String>,
        run_id: Option<String>,
        initial_history: Option<Vec<Message>>,
    ) -> Result<RunResult> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(EngineError::Io)?;
        rt.block_on(self.run(task, run_id, initial_history))
    }

    /// Synchronous event stream: yields every event of the run, ending
    /// after the terminal event. The run executes on a background thread.
    pub fn run_stream(
        self: &Arc<Self>,
        task: impl Into<String>,
        run_id: Option<String>,
        initial_history: Option<Vec<Message>>,
    ) -> RunEventIter {
        let (tx, rx) = std::sync::mpsc::channel::<Event>();
        let agent = self.clone();
        let task = task.into();
        let handle = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "run_stream failed to build a runtime");
                    return;
                }
            };
            let hook: EventHook = Box::new(move |ev: &Event| {
                let _ = tx.send(ev.clone());
            });
            let options = RunOptions { run_id, initial_history, resume: None, cancel: None };
            if let Err(e) = rt.block_on(agent.run_with_options(task, options, Some(hook))) {
                tracing::error!(error = %e, "run_stream run failed before emitting a terminal event");
            }
        });
        RunEventIter { rx, _handle: handle, done: false }
    }

    /// Asynchronous event stream for SSE gateways: same contents as
    /// [`Agent::run_stream`], delivered as a `Stream`.
    pub fn run_stream_async(
        self: &Arc<Self>,
        task: impl Into<String>,
        run_id: Option<String>,
        initial_history: Option<Vec<Message>>,
    ) -> sa_engine_domain::BoxStream<'static, Event> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let agent = self.clone();
        let task = task.into();
        tokio::spawn(async move {
            let hook: EventHook = Box::new(move |ev: &Event| {
                let _ = tx.send(ev.clone());
            });
            let options = RunOptions { run_id, initial_history, resume: None, cancel: None };
            if let Err(e) = agent.run_with_options(task, options, Some(hook)).await {
                tracing::error!(error = %e, "run_stream_async run failed before emitting a terminal event");
            }
        });
        Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        })
    }

    /// Resume a run whose WAL was seeded by `fork_run`: counts the copied
    /// events, then starts the loop with `resume` metadata on the new
    /// `run_started` event. History reconstruction is the caller's choice —
    /// pass a compaction summary (`summary` strategy) or a replayed
    /// transcript (`replay` strategy) as `initial_history`.
    pub async fn resume_forked(
        self: &Arc<Self>,
        task: impl Into<String>,
        dst_run_id: &str,
        initial_history: Option<Vec<Message>>,
    ) -> Result<RunResult> {
        let events_path =
            self.workspace_root.join(RUNTIME_DIR).join("runs").join(dst_run_id).join("events.jsonl");
        let raw = tokio::fs::read_to_string(&events_path).await?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let replayed = replay_lines(&lines);
        let strategy = match self.config.run.resume_strategy {
            ResumeStrategy::Summary => "summary",
            ResumeStrategy::Replay => "replay",
        };
        let resume = ResumeInfo {
            enabled: true,
            strategy: strategy.to_string(),
            previous_events: replayed.events.len() as u64,
        };
        let options = RunOptions { run_id: Some(dst_run_id.to_string()), initial_history, resume: Some(resume), cancel: None };
        self.run_with_options(task, options, None).await
    }

    async fn run_with_options(
        self: &Arc<Self>,
        task: impl Into<String>,
        options: RunOptions,
        hook: Option<EventHook>,
    ) -> Result<RunResult> {
        let task = task.into();
        let run_id = options.run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("run", run_id = %run_id);

        let backend = FileWalBackend::for_run(&self.workspace_root, RUNTIME_DIR, &run_id)?;
        let wal_locator = backend.path().display().to_string();
        let emitter = Arc::new(WalEmitter::new(Arc::new(backend)));
        if let Some(hook) = hook {
            emitter.add_hook(hook);
        }

        let mut ctx = RunContext::new(run_id.clone(), emitter, self.config.run.context_recovery.mode);
        ctx.env_store = EnvStore::new(self.env_provided.clone());

        ctx.emit(Event::new(
            &run_id,
            EventKind::RunStarted(RunStartedPayload { resume: options.resume, config_digest: self.config_digest() }),
        ));

        self.drive(&task, &mut ctx, options.initial_history, options.cancel, &wal_locator).instrument(span).await
    }

    fn config_digest(&self) -> String {
        let serialized = serde_json::to_string(&self.config).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The loop body. Emits the terminal event before returning; the outer
    /// `Result` is only for failures so early that no WAL exists.
    async fn drive(
        self: &Arc<Self>,
        task: &str,
        ctx: &mut RunContext<Arc<WalEmitter>>,
        initial_history: Option<Vec<Message>>,
        cancel: Option<sa_engine_loop::CancelToken>,
        wal_locator: &str,
    ) -> Result<RunResult> {
        let run_id = ctx.run_id.clone();
        let mut controller = LoopController::new(self.config.run.max_steps, self.config.run.max_wall_time_sec);
        if let Some(token) = cancel {
            controller.cancel = token;
        }
        let recovery = ContextRecovery::new(
            self.config.run.context_recovery.clone(),
            self.workspace_root.join(RUNTIME_DIR).join("runs").join(&run_id).join("artifacts"),
        );
        let gate = SafetyGate::new(self.config.safety.clone());
        let sandbox = match self.config.sandbox.default_policy {
            SandboxPolicy::None => SandboxPermission::Normal,
            SandboxPolicy::Restricted => SandboxPermission::RequireEscalated,
        };

        // Seed conversation: prompts first, then mentioned skills, then the
        // task itself.
        let namespaces: Vec<String> =
            self.config.skills.spaces.iter().filter(|s| s.enabled).map(|s| s.namespace.clone()).collect();
        ctx.history = initial_history.unwrap_or_default();
        if ctx.history.is_empty() {
            match build_system_message(&self.config.prompt, &namespaces).await {
                Ok(system) => ctx.history.push(system),
                Err(e) => {
                    return Ok(self.fail(ctx, wal_locator, ErrorKind::ConfigError, format!("system prompt: {e}"), None));
                }
            }
            match build_developer_message(&self.config.prompt).await {
                Ok(Some(dev)) => ctx.history.push(dev),
                Ok(None) => {}
                Err(e) => {
                    return Ok(self.fail(ctx, wal_locator, ErrorKind::ConfigError, format!("developer prompt: {e}"), None));
                }
            }
        }
        if let Some(skills) = &self.skills {
            let skills = skills.clone();
            if let Err(SeedFailure { error_kind, message }) = self.inject_mentioned_skills(task, &skills, ctx).await {
                return Ok(self.fail(ctx, wal_locator, error_kind, message, None));
            }
        }
        ctx.history.push(Message::user(task.to_string()));

        let dispatcher = Dispatcher {
            registry: self.registry.clone(),
            gate,
            approval_hub: Arc::new(ApprovalHub::new(run_id.clone())),
            approval_provider: self.approval_provider.clone(),
            approval_timeout_ms: self.config.safety.approval_timeout_ms,
            known_secrets: ctx.env_store.known_values(),
        };

        let tool_specs: Vec<sa_engine_domain::ToolSpec> = self.registry.specs().into_iter().cloned().collect();
        let summarizer = ChatBackendSummarizer { backend: self.backend.clone() };
        // Human interactions that carry operator choices (tool prompts,
        // recovery decisions) are journaled; env-var values go through the
        // raw provider and never reach the WAL.
        let evented_human_io: Option<Arc<dyn HumanIoProvider>> = self.human_io.clone().map(|inner| {
            Arc::new(EventedHumanIo { inner, emitter: ctx.emitter.clone(), run_id: run_id.clone() })
                as Arc<dyn HumanIoProvider>
        });
        let human_choice = evented_human_io.as_ref().map(|h| HumanIoChoiceAdapter { human_io: h.clone() });

        loop {
            // (a) budget, wall-time, cancellation.
            if controller.is_cancelled() {
                return Ok(self.cancel(ctx, wal_locator, "run cancelled"));
            }
            if controller.budget.check_wall_time().is_err() {
                return Ok(self.fail(ctx, wal_locator, ErrorKind::BudgetExceeded, "max_wall_time_sec exceeded", None));
            }

            let turn_id = controller.ids.next_turn_id();
            ctx.history = cap_history(
                std::mem::take(&mut ctx.history),
                self.config.prompt.history.max_messages,
                self.config.prompt.history.max_chars,
            );

            // (b) request a streaming completion.
            ctx.emit(
                Event::new(
                    &run_id,
                    EventKind::LlmRequestStarted(LlmRequestStartedPayload {
                        history_len: ctx.history.len(),
                        tool_specs_len: tool_specs.len(),
                    }),
                )
                .with_turn(&turn_id),
            );
            let request = ChatRequest { messages: ctx.history.clone(), tools: tool_specs.clone() };
            let mut stream = match self.backend.stream_chat(request).await {
                Ok(s) => s,
                Err(e) => return Ok(self.fail(ctx, wal_locator, ErrorKind::Unknown, format!("chat backend: {e}"), None)),
            };

            // (c) consume the stream.
            let mut turn_text = String::new();
            let mut pending_calls: Vec<RawToolCall> = Vec::new();
            let mut finish_reason = None;
            let mut overflow = false;
            while let Some(event) = stream.next().await {
                match event {
                    StreamEvent::TextDelta(text) => {
                        ctx.emit(
                            Event::new(&run_id, EventKind::TextDelta(TextDeltaPayload { text: text.clone() }))
                                .with_turn(&turn_id),
                        );
                        turn_text.push_str(&text);
                    }
                    StreamEvent::ToolCalls(calls) => pending_calls.extend(calls),
                    StreamEvent::Completed { finish_reason: reason } => {
                        finish_reason = Some(reason);
                        break;
                    }
                    StreamEvent::ContextLengthExceeded => {
                        overflow = true;
                        break;
                    }
                    StreamEvent::Error(message) => {
                        return Ok(self.fail(ctx, wal_locator, ErrorKind::Unknown, format!("stream error: {message}"), None));
                    }
                }
            }

            if overflow || finish_reason == Some(FinishReason::Length) {
                match self
                    .handle_overflow(ctx, &turn_id, &controller, &recovery, &summarizer, human_choice.as_ref())
                    .await
                {
                    OverflowOutcome::Continue(rebuilt) => {
                        ctx.history = rebuilt;
                        continue;
                    }
                    OverflowOutcome::Failed(message) => {
                        return Ok(self.fail(ctx, wal_locator, ErrorKind::ContextLengthExceeded, message, None));
                    }
                    OverflowOutcome::Handoff { artifact_path } => {
                        return Ok(self.complete_handoff(ctx, wal_locator, artifact_path, &recovery));
                    }
                }
            }

            if finish_reason == Some(FinishReason::Cancelled) {
                return Ok(self.cancel(ctx, wal_locator, "run cancelled during streaming"));
            }

            // (d) clean stop with no pending calls: done.
            if pending_calls.is_empty() {
                let metadata = serde_json::json!({
                    "steps": controller.budget.steps_consumed(),
                    "compactions": ctx.compaction.compactions_performed,
                });
                ctx.emit(
                    Event::new(
                        &run_id,
                        EventKind::RunCompleted(RunCompletedPayload {
                            final_output: turn_text.clone(),
                            artifacts: ctx.compaction.artifacts.clone(),
                            wal_locator: wal_locator.to_string(),
                            metadata: metadata.clone(),
                        }),
                    )
                    .with_turn(&turn_id),
                );
                return Ok(RunResult::completed(turn_text, wal_locator, metadata));
            }

            // (e) dispatch the batch in emitted order.
            let calls: Vec<ToolCall> =
                pending_calls.into_iter().map(|c| ToolCall::from_raw(c.call_id, c.name, c.raw_arguments)).collect();
            let known_secrets = ctx.env_store.known_values();
            ctx.emit(
                Event::new(
                    &run_id,
                    EventKind::ToolCalls(ToolCallsPayload {
                        calls: calls
                            .iter()
                            .map(|c| SanitizedToolCall {
                                call_id: c.call_id.clone(),
                                name: c.name.clone(),
                                arguments: sanitize_args(&c.name, &c.args, &known_secrets),
                            })
                            .collect(),
                    }),
                )
                .with_turn(&turn_id),
            );

            // The assistant tool-calls message precedes any tool result in
            // the history, with stable call_id linkage.
            let mut parts = Vec::new();
            if !turn_text.is_empty() {
                parts.push(ContentPart::Text { text: turn_text.clone() });
            }
            for call in &calls {
                parts.push(ContentPart::ToolUse { id: call.call_id.clone(), name: call.name.clone(), input: call.args.clone() });
            }
            ctx.history.push(Message::assistant_parts(parts));

            let exec_ctx = Arc::new(self.execution_context(ctx, &controller, evented_human_io.clone()));
            for call in calls {
                if controller.is_cancelled() {
                    return Ok(self.cancel(ctx, wal_locator, "run cancelled"));
                }
                if let Err(e) = controller.budget.try_consume_tool_step() {
                    let message = match e {
                        BudgetError::StepBudgetExceeded => {
                            format!("step budget exhausted after {} steps", controller.budget.steps_consumed())
                        }
                        BudgetError::WallTimeExceeded => "max_wall_time_sec exceeded".to_string(),
                    };
                    return Ok(self.fail(ctx, wal_locator, ErrorKind::BudgetExceeded, message, None));
                }
                let step_id = controller.ids.next_step_id();
                let call_id = call.call_id.clone();
                let call_name = call.name.clone();
                let dispatched =
                    dispatcher.dispatch(call, exec_ctx.clone(), &ctx.emitter, &run_id, &turn_id, &step_id, sandbox).await;
                ctx.history.push(Message::tool_result(call_id, dispatched.result.content.clone(), !dispatched.result.ok));

                if call_name == "update_plan" && dispatched.result.ok {
                    if let Ok(payload) =
                        serde_json::from_str::<sa_engine_domain::ToolResultPayload>(&dispatched.result.content)
                    {
                        ctx.emit(
                            Event::new(&run_id, EventKind::PlanUpdated(PlanUpdatedPayload { plan: payload.data }))
                                .with_turn(&turn_id)
                                .with_step(&step_id),
                        );
                    }
                }

                match dispatched.outcome {
                    DispatchOutcome::DeniedNoProvider => {
                        return Ok(self.fail(
                            ctx,
                            wal_locator,
                            ErrorKind::ConfigError,
                            "tool requires approval but no approval provider is configured",
                            None,
                        ));
                    }
                    DispatchOutcome::AbortedByApproval => {
                        return Ok(self.cancel(ctx, wal_locator, "run aborted at approval prompt"));
                    }
                    DispatchOutcome::DeniedByApproval => {
                        if let Some(key) = &dispatched.approval_key {
                            let count = controller.budget.record_denial(key);
                            if count >= DEFAULT_DENIAL_ABORT_THRESHOLD {
                                return Ok(self.fail(
                                    ctx,
                                    wal_locator,
                                    ErrorKind::ApprovalDenied,
                                    format!("approval denied {count} times for the same request"),
                                    None,
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    async fn handle_overflow(
        self: &Arc<Self>,
        ctx: &mut RunContext<Arc<WalEmitter>>,
        turn_id: &str,
        controller: &LoopController,
        recovery: &ContextRecovery,
        summarizer: &ChatBackendSummarizer,
        human_choice: Option<&HumanIoChoiceAdapter>,
    ) -> OverflowOutcome {
        let run_id = ctx.run_id.clone();
        let mode = match ctx.context_recovery_mode {
            ContextRecoveryMode::CompactFirst => "compact_first",
            ContextRecoveryMode::AskFirst => "ask_first",
            ContextRecoveryMode::FailFast => "fail_fast",
        };
        ctx.emit(
            Event::new(&run_id, EventKind::ContextLengthExceeded(ContextLengthExceededPayload { mode: mode.to_string() }))
                .with_turn(turn_id),
        );

        let snapshot = ctx.history.clone();
        let action = recovery
            .recover(
                &snapshot,
                summarizer,
                human_choice.map(|h| h as &dyn sa_engine_context::HumanChoiceProvider),
                self.config.run.human_timeout_ms,
            )
            .await;
        let action = match action {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "context recovery failed");
                return OverflowOutcome::Failed(e.to_string());
            }
        };

        match action {
            RecoveryAction::Failed => {
                OverflowOutcome::Failed("context length exceeded and recovery declined to continue".into())
            }
            RecoveryAction::Compacted(outcome) => {
                self.emit_compaction(ctx, turn_id, recovery, &outcome);
                OverflowOutcome::Continue(outcome.history)
            }
            RecoveryAction::Handoff(outcome) => {
                self.emit_compaction(ctx, turn_id, recovery, &outcome);
                OverflowOutcome::Handoff { artifact_path: outcome.artifact_path }
            }
            RecoveryAction::BudgetIncreased { extra_steps, extra_wall_time_sec, compaction } => {
                controller.budget.increase_budget(extra_steps, extra_wall_time_sec);
                ctx.emit(
                    Event::new(&run_id, EventKind::BudgetIncreased(BudgetIncreasedPayload { extra_steps, extra_wall_time_sec }))
                        .with_turn(turn_id),
                );
                self.emit_compaction(ctx, turn_id, recovery, &compaction);
                OverflowOutcome::Continue(compaction.history)
            }
        }
    }

    fn emit_compaction(
        self: &Arc<Self>,
        ctx: &mut RunContext<Arc<WalEmitter>>,
        turn_id: &str,
        recovery: &ContextRecovery,
        outcome: &sa_engine_context::CompactionOutcome,
    ) {
        let run_id = ctx.run_id.clone();
        ctx.emit(
            Event::new(
                &run_id,
                EventKind::CompactionStarted(CompactionStartedPayload { reason: "context_length_exceeded".into() }),
            )
            .with_turn(turn_id),
        );
        ctx.compaction.compactions_performed = recovery.compactions_performed();
        ctx.compaction.artifacts.push(outcome.artifact_path.clone());
        ctx.emit(
            Event::new(
                &run_id,
                EventKind::ContextCompacted(ContextCompactedPayload {
                    reason: "context_length_exceeded".into(),
                    count: recovery.compactions_performed() as usize,
                    artifact_path: outcome.artifact_path.clone(),
                    summary_len: outcome.summary_len,
                    summary_sha256: outcome.summary_sha256.clone(),
                }),
            )
            .with_turn(turn_id),
        );
        ctx.emit(
            Event::new(
                &run_id,
                EventKind::CompactionFinished(CompactionFinishedPayload {
                    compactions_performed: recovery.compactions_performed(),
                }),
            )
            .with_turn(turn_id),
        );
    }

    fn complete_handoff(
        self: &Arc<Self>,
        ctx: &mut RunContext<Arc<WalEmitter>>,
        wal_locator: &str,
        artifact_path: String,
        recovery: &ContextRecovery,
    ) -> RunResult {
        let final_output = format!("handoff: {artifact_path}");
        let metadata = serde_json::json!({
            "handoff": true,
            "artifact_path": artifact_path,
            "compactions": recovery.compactions_performed(),
        });
        let run_id = ctx.run_id.clone();
        ctx.emit(Event::new(
            &run_id,
            EventKind::RunCompleted(RunCompletedPayload {
                final_output: final_output.clone(),
                artifacts: ctx.compaction.artifacts.clone(),
                wal_locator: wal_locator.to_string(),
                metadata: metadata.clone(),
            }),
        ));
        RunResult::completed(final_output, wal_locator, metadata)
    }

    /// Resolve `$[ns].name` mentions in the task, verify env-var
    /// dependencies, and inject each surviving body into the history.
    async fn inject_mentioned_skills(
        self: &Arc<Self>,
        task: &str,
        skills: &Arc<SkillsManager>,
        ctx: &mut RunContext<Arc<WalEmitter>>,
    ) -> std::result::Result<(), SeedFailure> {
        let run_id = ctx.run_id.clone();
        let resolved = match skills.resolve_mentions(task).await {
            Ok(resolved) => resolved,
            Err(SkillError::SpaceNotConfigured(ns)) => {
                return Err(SeedFailure {
                    error_kind: ErrorKind::ConfigError,
                    message: format!("skill space not configured: {ns}"),
                });
            }
            Err(SkillError::Unknown { namespace, skill_name }) => {
                return Err(SeedFailure {
                    error_kind: ErrorKind::NotFound,
                    message: format!("unknown skill: {namespace}.{skill_name}"),
                });
            }
            Err(e) => return Err(SeedFailure { error_kind: ErrorKind::Unknown, message: e.to_string() }),
        };

        for skill in resolved {
            let mention_text = format!("$[{}].{}", skill.namespace.as_str(), skill.skill_name);
            match self.resolve_skill_env(skills, &skill, ctx).await {
                EnvResolution::Ready => {}
                EnvResolution::Skip => {
                    ctx.emit(Event::new(
                        &run_id,
                        EventKind::SkillInjectionSkipped(SkillInjectionSkippedPayload {
                            mention_text,
                            reason: "env_var_missing".into(),
                        }),
                    ));
                    continue;
                }
                EnvResolution::Fail { error_kind, message } => return Err(SeedFailure { error_kind, message }),
            }

            match skills.inject(&skill) {
                Ok(envelope) => {
                    let bytes = envelope.len();
                    ctx.history.push(Message::system(envelope));
                    ctx.emit(Event::new(
                        &run_id,
                        EventKind::SkillInjected(SkillInjectedPayload {
                            mention_text,
                            skill_name: skill.skill_name.clone(),
                            namespace: skill.namespace.as_str().to_string(),
                            locator: skill.locator.clone(),
                            bytes,
                        }),
                    ));
                }
                Err(SkillError::BodyTooLarge { actual, limit }) => {
                    return Err(SeedFailure {
                        error_kind: ErrorKind::Validation,
                        message: format!("skill body too large: {actual} bytes exceeds {limit} byte budget"),
                    });
                }
                Err(e) => return Err(SeedFailure { error_kind: ErrorKind::Unknown, message: e.to_string() }),
            }
        }
        Ok(())
    }

    /// Check a skill's `required_env_vars`, honoring
    /// `env_var_missing_policy`. Events carry variable names and sources,
    /// never values.
    async fn resolve_skill_env(
        self: &Arc<Self>,
        skills: &Arc<SkillsManager>,
        skill: &Skill,
        ctx: &mut RunContext<Arc<WalEmitter>>,
    ) -> EnvResolution {
        let run_id = ctx.run_id.clone();
        let missing = match skills.resolve_env_vars(skill, &ctx.env_store) {
            EnvVarOutcome::Resolved(resolved) => {
                for (name, _value, source) in resolved {
                    ctx.emit(Event::new(
                        &run_id,
                        EventKind::EnvVarSet(EnvVarPayload { env_var: name, source: source.as_str().to_string() }),
                    ));
                }
                return EnvResolution::Ready;
            }
            EnvVarOutcome::Missing(missing) => missing,
        };

        for var in &missing {
            ctx.emit(Event::new(
                &run_id,
                EventKind::EnvVarRequired(EnvVarPayload { env_var: var.clone(), source: "skill_dependency".into() }),
            ));
        }

        match skills.env_var_missing_policy() {
            EnvVarMissingPolicy::SkipSkill => EnvResolution::Skip,
            EnvVarMissingPolicy::FailFast => EnvResolution::Fail {
                error_kind: ErrorKind::ConfigError,
                message: format!("missing required env vars for {}: {}", skill.skill_name, missing.join(", ")),
            },
            EnvVarMissingPolicy::AskHuman => {
                let Some(human_io) = &self.human_io else {
                    return EnvResolution::Fail {
                        error_kind: ErrorKind::HumanRequired,
                        message: format!(
                            "env vars {} required by {} and no human IO provider is configured",
                            missing.join(", "),
                            skill.skill_name
                        ),
                    };
                };
                for var in missing {
                    let prompt = format!("Skill '{}' needs env var {var}. Provide a value:", skill.skill_name);
                    match human_io.request_human_input(&prompt).await {
                        Ok(value) => {
                            ctx.env_store.set_human(&var, value);
                            ctx.emit(Event::new(
                                &run_id,
                                EventKind::EnvVarSet(EnvVarPayload { env_var: var, source: "human".into() }),
                            ));
                        }
                        Err(e) => {
                            return EnvResolution::Fail {
                                error_kind: ErrorKind::HumanRequired,
                                message: format!("human input for env var {var} failed: {e}"),
                            };
                        }
                    }
                }
                EnvResolution::Ready
            }
        }
    }

    fn execution_context(
        self: &Arc<Self>,
        ctx: &RunContext<Arc<WalEmitter>>,
        controller: &LoopController,
        human_io: Option<Arc<dyn HumanIoProvider>>,
    ) -> ExecutionContext {
        let cancel = controller.cancel.clone();
        let mut exec_ctx = ExecutionContext::new(self.workspace_root.clone());
        exec_ctx.known_secrets = ctx.env_store.known_values();
        exec_ctx.env = self.env_provided.clone();
        exec_ctx.cancel_checker = Some(Arc::new(move || Ok::<bool, String>(cancel.is_cancelled())));
        exec_ctx.executor = Some(self.executor.clone());
        exec_ctx.exec_sessions = self.exec_sessions.clone();
        exec_ctx.skills = self.skills.as_ref().map(|s| {
            Arc::new(SkillAccessAdapter::new(s.clone(), self.executor.clone(), exec_ctx.default_timeout_ms, &self.config.skills))
                as Arc<dyn sa_engine_tools::SkillAccess>
        });
        exec_ctx.agents = Some(Arc::new(self.spawner.clone()));
        exec_ctx.web_search = self.web_search.clone();
        exec_ctx.human_io = human_io;
        exec_ctx
    }

    fn fail(
        self: &Arc<Self>,
        ctx: &mut RunContext<Arc<WalEmitter>>,
        wal_locator: &str,
        error_kind: ErrorKind,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> RunResult {
        let message = message.into();
        let run_id = ctx.run_id.clone();
        ctx.emit(Event::new(
            &run_id,
            EventKind::RunFailed(RunFailedPayload {
                error_kind,
                message: message.clone(),
                retryable: matches!(error_kind, ErrorKind::Timeout),
                wal_locator: wal_locator.to_string(),
                details,
            }),
        ));
        RunResult::failed(message, error_kind, wal_locator)
    }

    fn cancel(self: &Arc<Self>, ctx: &mut RunContext<Arc<WalEmitter>>, wal_locator: &str, message: &str) -> RunResult {
        let run_id = ctx.run_id.clone();
        ctx.emit(Event::new(
            &run_id,
            EventKind::RunCancelled(RunCancelledPayload { message: message.to_string(), wal_locator: wal_locator.to_string() }),
        ));
        RunResult::cancelled(message, wal_locator)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("workspace_root", &self.workspace_root).finish()
    }
}

type EventHook = Box<dyn Fn(&Event) + Send + Sync>;

/// Journals `human_request`/`human_response` around a delegate provider.
/// Used for tool prompts and recovery choices; env-var value resolution
/// bypasses it so secret values never reach the WAL.
struct EventedHumanIo {
    inner: Arc<dyn HumanIoProvider>,
    emitter: Arc<WalEmitter>,
    run_id: String,
}

#[async_trait::async_trait]
impl HumanIoProvider for EventedHumanIo {
    async fn request_human_input(&self, prompt: &str) -> Result<String> {
        self.emitter.emit(Event::new(
            &self.run_id,
            EventKind::HumanRequest(HumanRequestPayload { prompt: prompt.to_string(), choices: Vec::new() }),
        ));
        let reply = self.inner.request_human_input(prompt).await?;
        self.emitter.emit(Event::new(
            &self.run_id,
            EventKind::HumanResponse(HumanResponsePayload { choice: reply.clone() }),
        ));
        Ok(reply)
    }
}

struct SeedFailure {
    error_kind: ErrorKind,
    message: String,
}

enum EnvResolution {
    Ready,
    Skip,
    Fail { error_kind: ErrorKind, message: String },
}

enum OverflowOutcome {
    Continue(Vec<Message>),
    Failed(String),
    Handoff { artifact_path: String },
}

/// Blocking iterator over one run's events, ending after the terminal
/// event (or when the producing thread exits).
pub struct RunEventIter {
    rx: std::sync::mpsc::Receiver<Event>,
    _handle: std::thread::JoinHandle<()>,
    done: bool,
}

impl Iterator for RunEventIter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(event) => {
                if event.is_terminal() {
                    self.done = true;
                }
                Some(event)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}
