use std::sync::Arc;
use std::time::Instant;

use sa_engine_domain::{ErrorKind, ToolCall, ToolResult, ToolResultPayload};

use crate::context::ExecutionContext;

fn err(kind: ErrorKind, msg: impl Into<String>, start: Instant) -> ToolResult {
    ToolResult::from_payload(&ToolResultPayload::err(kind, msg, start.elapsed().as_millis() as u64))
}

pub async fn spawn_agent(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(goal) = call.args.get("goal").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'goal'", start);
    };
    let Some(agents) = &ctx.agents else {
        return err(ErrorKind::ConfigError, "no agent spawner configured", start);
    };
    match agents.spawn(goal.to_string()).await {
        Ok(run_id) => {
            let mut payload = ToolResultPayload::ok(run_id.clone(), start.elapsed().as_millis() as u64);
            payload.data = serde_json::json!({ "run_id": run_id });
            ToolResult::from_payload(&payload)
        }
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}

fn child_run_id(call: &ToolCall, start: Instant) -> Result<String, ToolResult> {
    call.args
        .get("run_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| err(ErrorKind::Validation, "missing 'run_id'", start))
}

pub async fn wait_agent(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let run_id = match child_run_id(&call, start) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let timeout_ms = call.args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(ctx.default_timeout_ms);
    let Some(agents) = &ctx.agents else {
        return err(ErrorKind::ConfigError, "no agent spawner configured", start);
    };
    match agents.wait(&run_id, timeout_ms).await {
        Ok(outcome) => {
            let mut payload = ToolResultPayload::ok(outcome.to_string(), start.elapsed().as_millis() as u64);
            payload.data = outcome;
            ToolResult::from_payload(&payload)
        }
        Err(e) => err(ErrorKind::Timeout, e.to_string(), start),
    }
}

pub async fn send_input(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let run_id = match child_run_id(&call, start) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(text) = call.args.get("text").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'text'", start);
    };
    let Some(agents) = &ctx.agents else {
        return err(ErrorKind::ConfigError, "no agent spawner configured", start);
    };
    match agents.send_input(&run_id, text.to_string()).await {
        Ok(()) => ToolResult::from_payload(&ToolResultPayload::ok("sent", start.elapsed().as_millis() as u64)),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}

pub async fn close_agent(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let run_id = match child_run_id(&call, start) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(agents) = &ctx.agents else {
        return err(ErrorKind::ConfigError, "no agent spawner configured", start);
    };
    match agents.close(&run_id).await {
        Ok(()) => ToolResult::from_payload(&ToolResultPayload::ok("closed", start.elapsed().as_millis() as u64)),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}

pub async fn resume_agent(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let run_id = match child_run_id(&call, start) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(agents) = &ctx.agents else {
        return err(ErrorKind::ConfigError, "no agent spawner configured", start);
    };
    match agents.resume(&run_id).await {
        Ok(()) => ToolResult::from_payload(&ToolResultPayload::ok("resumed", start.elapsed().as_millis() as u64)),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_engine_domain::Result as EngineResult;

    struct FakeSpawner;
    #[async_trait::async_trait]
    impl crate::context::AgentSpawner for FakeSpawner {
        async fn spawn(&self, _goal: String) -> EngineResult<String> {
            Ok("child-1".into())
        }
        async fn wait(&self, _child_run_id: &str, _timeout_ms: u64) -> EngineResult<serde_json::Value> {
            Ok(serde_json::json!({"status": "done"}))
        }
        async fn send_input(&self, _child_run_id: &str, _text: String) -> EngineResult<()> {
            Ok(())
        }
        async fn close(&self, _child_run_id: &str) -> EngineResult<()> {
            Ok(())
        }
        async fn resume(&self, _child_run_id: &str) -> EngineResult<()> {
            Ok(())
        }
    }

    fn ctx_with_spawner(dir: &std::path::Path) -> Arc<ExecutionContext> {
        let mut ctx = ExecutionContext::new(dir.to_path_buf());
        ctx.agents = Some(Arc::new(FakeSpawner));
        Arc::new(ctx)
    }

    #[tokio::test]
    async fn spawn_agent_without_spawner_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::from_raw("c1", "spawn_agent", Some(r#"{"goal":"do x"}"#.into()));
        let result = spawn_agent(call, Arc::new(ExecutionContext::new(dir.path().to_path_buf()))).await;
        assert_eq!(result.error_kind, Some(ErrorKind::ConfigError));
    }

    #[tokio::test]
    async fn spawn_agent_returns_child_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::from_raw("c1", "spawn_agent", Some(r#"{"goal":"do x"}"#.into()));
        let result = spawn_agent(call, ctx_with_spawner(dir.path())).await;
        assert!(result.ok);
    }

    #[tokio::test]
    async fn wait_agent_returns_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::from_raw("c1", "wait_agent", Some(r#"{"run_id":"child-1"}"#.into()));
        let result = wait_agent(call, ctx_with_spawner(dir.path())).await;
        assert!(result.ok);
    }
}
