use std::sync::Arc;
use std::time::Instant;

use sa_engine_domain::{ErrorKind, ToolCall, ToolResult, ToolResultPayload};

use crate::context::ExecutionContext;

fn err(kind: ErrorKind, msg: impl Into<String>, start: Instant) -> ToolResult {
    ToolResult::from_payload(&ToolResultPayload::err(kind, msg, start.elapsed().as_millis() as u64))
}

fn namespace_and_name(call: &ToolCall, start: Instant) -> Result<(String, String), ToolResult> {
    let namespace = call.args.get("namespace").and_then(|v| v.as_str()).ok_or_else(|| err(ErrorKind::Validation, "missing 'namespace'", start))?;
    let skill_name =
        call.args.get("skill_name").and_then(|v| v.as_str()).ok_or_else(|| err(ErrorKind::Validation, "missing 'skill_name'", start))?;
    Ok((namespace.to_string(), skill_name.to_string()))
}

pub async fn skill_ref_read(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let (namespace, skill_name) = match namespace_and_name(&call, start) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(skills) = &ctx.skills else {
        return err(ErrorKind::ConfigError, "no skills manager configured", start);
    };
    match skills.read_body(&namespace, &skill_name).await {
        Ok(body) => ToolResult::from_payload(&ToolResultPayload::ok(body, start.elapsed().as_millis() as u64)),
        Err(sa_engine_domain::EngineError::Disabled(msg)) => err(ErrorKind::Permission, msg, start),
        Err(e) => err(ErrorKind::NotFound, e.to_string(), start),
    }
}

pub async fn skill_exec(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let (namespace, skill_name) = match namespace_and_name(&call, start) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entry) = call.args.get("entry").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'entry'", start);
    };
    let args: Vec<String> = call
        .args
        .get("args")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let Some(skills) = &ctx.skills else {
        return err(ErrorKind::ConfigError, "no skills manager configured", start);
    };
    match skills.run_bundle_entry(&namespace, &skill_name, entry, &args).await {
        Ok(output) => ToolResult::from_payload(&ToolResultPayload::ok(output, start.elapsed().as_millis() as u64)),
        Err(sa_engine_domain::EngineError::Disabled(msg)) => err(ErrorKind::Permission, msg, start),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}
