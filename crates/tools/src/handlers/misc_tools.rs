use std::sync::Arc;
use std::time::Instant;

use sa_engine_domain::{ErrorKind, ToolCall, ToolResult, ToolResultPayload};

use crate::context::ExecutionContext;

fn err(kind: ErrorKind, msg: impl Into<String>, start: Instant) -> ToolResult {
    ToolResult::from_payload(&ToolResultPayload::err(kind, msg, start.elapsed().as_millis() as u64))
}

/// Records a structured plan in the tool result for the loop to surface as
/// a `plan_updated` event; the dispatcher, not this handler, emits that
/// event; handlers only produce results.
pub async fn update_plan(call: ToolCall, _ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(steps) = call.args.get("steps").and_then(|v| v.as_array()) else {
        return err(ErrorKind::Validation, "missing 'steps'", start);
    };
    let mut payload = ToolResultPayload::ok(format!("{} steps", steps.len()), start.elapsed().as_millis() as u64);
    payload.data = serde_json::json!({ "steps": steps });
    ToolResult::from_payload(&payload)
}

pub async fn request_user_input(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(prompt) = call.args.get("prompt").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'prompt'", start);
    };
    let Some(human_io) = &ctx.human_io else {
        return err(ErrorKind::HumanRequired, "no human IO provider configured", start);
    };
    match human_io.request_human_input(prompt).await {
        Ok(answer) => ToolResult::from_payload(&ToolResultPayload::ok(answer, start.elapsed().as_millis() as u64)),
        Err(e) => err(ErrorKind::HumanRequired, e.to_string(), start),
    }
}

pub async fn view_image(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'path'", start);
    };
    let resolved = match ctx.resolve_path(path) {
        Ok(p) => p,
        Err(e) => return err(ErrorKind::Validation, e, start),
    };
    match tokio::fs::metadata(&resolved).await {
        Ok(meta) => {
            let mut payload =
                ToolResultPayload::ok(format!("image at {path}, {} bytes", meta.len()), start.elapsed().as_millis() as u64);
            payload.data = serde_json::json!({ "path": path, "bytes": meta.len() });
            ToolResult::from_payload(&payload)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => err(ErrorKind::NotFound, e.to_string(), start),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}

pub async fn web_search(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(query) = call.args.get("query").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'query'", start);
    };
    let Some(provider) = &ctx.web_search else {
        return err(ErrorKind::ConfigError, "no web search provider configured", start);
    };
    match provider.search(query).await {
        Ok(results) => ToolResult::from_payload(&ToolResultPayload::ok(results.join("\n"), start.elapsed().as_millis() as u64)),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}
