use std::sync::Arc;
use std::time::Instant;

use sa_engine_domain::{ErrorKind, ToolCall, ToolResult, ToolResultPayload};
use sa_engine_exec::CommandRequest;
use sa_engine_safety::risk::is_dangerous_env_var;

use crate::context::ExecutionContext;

fn err(kind: ErrorKind, msg: impl Into<String>, start: Instant) -> ToolResult {
    ToolResult::from_payload(&ToolResultPayload::err(kind, msg, start.elapsed().as_millis() as u64))
}

/// The run-provided env, minus names that can redirect linking or shell
/// startup in the child.
fn safe_env(ctx: &ExecutionContext) -> Option<std::collections::HashMap<String, String>> {
    if ctx.env.is_empty() {
        return None;
    }
    Some(ctx.env.iter().filter(|(k, _)| !is_dangerous_env_var(k)).map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn command_result_to_payload(result: sa_engine_exec::CommandResult) -> ToolResultPayload {
    ToolResultPayload {
        ok: result.ok,
        stdout: result.stdout,
        stderr: result.stderr,
        exit_code: result.exit_code,
        duration_ms: result.duration_ms,
        truncated: result.truncated,
        data: serde_json::Value::Null,
        error_kind: result.error_kind,
        retryable: matches!(result.error_kind, Some(ErrorKind::Timeout)),
        retry_after_ms: None,
    }
}

/// One-shot `sh -c <command>` execution via the run's `Executor`.
pub async fn shell_exec(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(command) = call.args.get("command").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'command'", start);
    };
    let Some(executor) = &ctx.executor else {
        return err(ErrorKind::ConfigError, "no executor configured", start);
    };
    let timeout_ms = call.args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(ctx.default_timeout_ms);

    let mut req = CommandRequest::new(vec!["sh".into(), "-c".into(), command.to_string()], timeout_ms);
    req.cwd = Some(ctx.workspace_root.clone());
    req.env = safe_env(&ctx);
    req.cancel_checker = ctx.cancel_checker.clone();

    let result = executor.run_command(req).await;
    ToolResult::from_payload(&command_result_to_payload(result))
}

/// Run an argv command directly (no shell interpolation).
pub async fn exec_command(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(argv) = call.args.get("argv").and_then(|v| v.as_array()) else {
        return err(ErrorKind::Validation, "missing 'argv'", start);
    };
    let argv: Option<Vec<String>> = argv.iter().map(|v| v.as_str().map(str::to_string)).collect();
    let Some(argv) = argv else {
        return err(ErrorKind::Validation, "'argv' must be an array of strings", start);
    };
    if argv.is_empty() {
        return err(ErrorKind::Validation, "'argv' must not be empty", start);
    }
    let Some(executor) = &ctx.executor else {
        return err(ErrorKind::ConfigError, "no executor configured", start);
    };
    let timeout_ms = call.args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(ctx.default_timeout_ms);

    let mut req = CommandRequest::new(argv, timeout_ms);
    req.cwd = Some(ctx.workspace_root.clone());
    req.env = safe_env(&ctx);
    req.cancel_checker = ctx.cancel_checker.clone();

    let result = executor.run_command(req).await;
    ToolResult::from_payload(&command_result_to_payload(result))
}

/// Write to a previously-spawned interactive session. The session must have been created out of band
/// (e.g. by a handler that calls `ExecSessions::spawn` directly); this
/// tool only drives the `write` half of the contract.
pub async fn write_stdin(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(session_id) = call.args.get("session_id").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'session_id'", start);
    };
    let chars = call.args.get("chars").and_then(|v| v.as_str()).unwrap_or("");
    let yield_time_ms = call.args.get("yield_time_ms").and_then(|v| v.as_u64()).unwrap_or(200);
    let max_output_bytes = call.args.get("max_output_bytes").and_then(|v| v.as_u64()).unwrap_or(65536) as usize;

    let Some(sessions) = &ctx.exec_sessions else {
        return err(ErrorKind::ConfigError, "no exec sessions configured", start);
    };

    match sessions.write(session_id, chars, yield_time_ms, max_output_bytes).await {
        Some(outcome) => {
            let mut payload =
                ToolResultPayload::ok(outcome.stdout.clone(), start.elapsed().as_millis() as u64);
            payload.stderr = outcome.stderr;
            payload.exit_code = outcome.exit_code;
            payload.truncated = outcome.truncated;
            payload.data = serde_json::json!({ "running": outcome.running });
            ToolResult::from_payload(&payload)
        }
        None => err(ErrorKind::NotFound, format!("no session '{session_id}'"), start),
    }
}
