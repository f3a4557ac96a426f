use std::sync::Arc;
use std::time::Instant;

use sa_engine_domain::{ErrorKind, ToolCall, ToolResult, ToolResultPayload};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::context::ExecutionContext;

fn err(kind: ErrorKind, msg: impl Into<String>, start: Instant) -> ToolResult {
    ToolResult::from_payload(&ToolResultPayload::err(kind, msg, start.elapsed().as_millis() as u64))
}

pub async fn read_file(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(path) = call.args.get("file_path").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'file_path'", start);
    };
    let resolved = match ctx.resolve_path(path) {
        Ok(p) => p,
        Err(e) => return err(ErrorKind::Validation, e, start),
    };
    match tokio::fs::read_to_string(&resolved).await {
        Ok(contents) => {
            let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
            let lines: Vec<&str> = contents.lines().collect();
            // An offset past end-of-file is a caller mistake, not an empty
            // read.
            if offset > 0 && offset >= lines.len() {
                return err(ErrorKind::Validation, format!("offset {offset} is past end of file ({} lines)", lines.len()), start);
            }
            let take = limit.unwrap_or(usize::MAX);
            let numbered: Vec<String> = lines
                .iter()
                .enumerate()
                .skip(offset)
                .take(take)
                .map(|(i, line)| format!("L{}: {line}", i + 1))
                .collect();
            ToolResult::from_payload(&ToolResultPayload::ok(numbered.join("\n"), start.elapsed().as_millis() as u64))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => err(ErrorKind::NotFound, e.to_string(), start),
        Err(e) => err(ErrorKind::Unknown, e.to_string(), start),
    }
}

pub async fn list_dir(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let path = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
    let resolved = match ctx.resolve_path(path) {
        Ok(p) => p,
        Err(e) => return err(ErrorKind::Validation, e, start),
    };
    let mut entries = match tokio::fs::read_dir(&resolved).await {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return err(ErrorKind::NotFound, e.to_string(), start),
        Err(e) => return err(ErrorKind::Unknown, e.to_string(), start),
    };
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    ToolResult::from_payload(&ToolResultPayload::ok(names.join("\n"), start.elapsed().as_millis() as u64))
}

pub async fn grep_files(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(pattern) = call.args.get("pattern").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'pattern'", start);
    };
    let path = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
    let re = match regex::Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => return err(ErrorKind::Validation, format!("invalid regex: {e}"), start),
    };
    let resolved = match ctx.resolve_path(path) {
        Ok(p) => p,
        Err(e) => return err(ErrorKind::Validation, e, start),
    };

    let mut matches = Vec::new();
    let mut stack = vec![resolved];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else { continue };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
                continue;
            }
            if let Ok(contents) = tokio::fs::read_to_string(&p).await {
                for (lineno, line) in contents.lines().enumerate() {
                    if re.is_match(line) {
                        matches.push(format!("{}:{}:{}", p.display(), lineno + 1, line));
                    }
                }
            }
        }
    }
    ToolResult::from_payload(&ToolResultPayload::ok(matches.join("\n"), start.elapsed().as_millis() as u64))
}

pub async fn file_write(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'path'", start);
    };
    let Some(content) = call.args.get("content").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'content'", start);
    };
    let resolved = match ctx.resolve_path(path) {
        Ok(p) => p,
        Err(e) => return err(ErrorKind::Validation, e, start),
    };
    if let Some(parent) = resolved.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return err(ErrorKind::Unknown, e.to_string(), start);
        }
    }
    let mut file = match tokio::fs::File::create(&resolved).await {
        Ok(f) => f,
        Err(e) => return err(ErrorKind::Unknown, e.to_string(), start),
    };
    if let Err(e) = file.write_all(content.as_bytes()).await {
        return err(ErrorKind::Unknown, e.to_string(), start);
    }

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let mut payload = ToolResultPayload::ok(format!("wrote {} bytes", content.len()), start.elapsed().as_millis() as u64);
    payload.data = serde_json::json!({ "bytes": content.len(), "content_sha256": hex::encode(hasher.finalize()) });
    ToolResult::from_payload(&payload)
}

/// A minimal unified-diff-style patch: blocks of
/// `--- path`/`+ line`/`- line` hunks applied as whole-line add/remove
/// against the file's current lines. Sufficient for model-authored
/// single-file edits without pulling in a full diff/patch crate.
pub async fn apply_patch(call: ToolCall, ctx: Arc<ExecutionContext>) -> ToolResult {
    let start = Instant::now();
    let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'path'", start);
    };
    let Some(patch) = call.args.get("patch").and_then(|v| v.as_str()) else {
        return err(ErrorKind::Validation, "missing 'patch'", start);
    };
    let resolved = match ctx.resolve_path(path) {
        Ok(p) => p,
        Err(e) => return err(ErrorKind::Validation, e, start),
    };
    let original = tokio::fs::read_to_string(&resolved).await.unwrap_or_default();
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

    for hunk_line in patch.lines() {
        if let Some(added) = hunk_line.strip_prefix("+ ") {
            lines.push(added.to_string());
        } else if let Some(removed) = hunk_line.strip_prefix("- ") {
            if let Some(pos) = lines.iter().position(|l| l == removed) {
                lines.remove(pos);
            }
        }
    }

    let new_content = lines.join("\n");
    if let Some(parent) = resolved.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    if let Err(e) = tokio::fs::write(&resolved, &new_content).await {
        return err(ErrorKind::Unknown, e.to_string(), start);
    }
    ToolResult::from_payload(&ToolResultPayload::ok(format!("patched {path}"), start.elapsed().as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_engine_domain::ToolCall;

    fn ctx(dir: &std::path::Path) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(dir.to_path_buf()))
    }

    #[tokio::test]
    async fn read_file_returns_numbered_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\nworld\n").unwrap();
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt"}"#.into()));
        let result = read_file(call, ctx(dir.path())).await;
        assert!(result.ok);
        assert!(result.content.contains("L1: hello"));
        assert!(result.content.contains("L2: world"));
    }

    #[tokio::test]
    async fn read_file_missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"missing.txt"}"#.into()));
        let result = read_file(call, ctx(dir.path())).await;
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn read_file_offset_keeps_absolute_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt","offset":1,"limit":1}"#.into()));
        let result = read_file(call, ctx(dir.path())).await;
        assert!(result.ok);
        let payload: ToolResultPayload = serde_json::from_str(&result.content).unwrap();
        assert_eq!(payload.stdout, "L2: two");
    }

    #[tokio::test]
    async fn read_file_offset_past_end_is_validation_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"file_path":"a.txt","offset":10}"#.into()));
        let result = read_file(call, ctx(dir.path())).await;
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn file_write_creates_file_and_hashes_content() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::from_raw("c1", "file_write", Some(r#"{"path":"out.txt","content":"hi"}"#.into()));
        let result = file_write(call, ctx(dir.path())).await;
        assert!(result.ok);
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn grep_files_finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\nworld\n").unwrap();
        let call = ToolCall::from_raw("c1", "grep_files", Some(r#"{"pattern":"wor.d"}"#.into()));
        let result = grep_files(call, ctx(dir.path())).await;
        assert!(result.ok);
        assert!(result.content.contains("world"));
    }

    #[tokio::test]
    async fn apply_patch_adds_and_removes_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "keep\nremove_me\n").unwrap();
        let call =
            ToolCall::from_raw("c1", "apply_patch", Some(r#"{"path":"a.txt","patch":"- remove_me\n+ added"}"#.into()));
        let result = apply_patch(call, ctx(dir.path())).await;
        assert!(result.ok);
        let updated = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert!(updated.contains("added"));
        assert!(!updated.contains("remove_me"));
    }

    #[tokio::test]
    async fn path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall::from_raw("c1", "read_file", Some(r#"{"path":"../escape.txt"}"#.into()));
        let result = read_file(call, ctx(dir.path())).await;
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    }
}
