pub mod agent_tools;
pub mod exec_tools;
pub mod fs_tools;
pub mod misc_tools;
pub mod skill_tools;

use sa_engine_domain::{Idempotency, ToolSpec};

use crate::registry::{Handler, ToolRegistry};

fn spec(name: &str, description: &str, requires_approval: bool, idempotency: Idempotency) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: serde_json::json!({"type": "object"}),
        requires_approval,
        idempotency,
    }
}

macro_rules! handler {
    ($func:path) => {
        std::sync::Arc::new(|call, ctx| Box::pin($func(call, ctx)) as crate::registry::HandlerFuture) as Handler
    };
}

/// Register the canonical built-in tool set. Callers may
/// register additional tools with `allow_override=false` beforehand or
/// afterward; this only fails if a name collides.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), crate::registry::RegisterError> {
    registry.register(
        spec("read_file", "Read a file under the workspace root.", false, Idempotency::Safe),
        handler!(fs_tools::read_file),
        false,
    )?;
    registry.register(
        spec("list_dir", "List a directory under the workspace root.", false, Idempotency::Safe),
        handler!(fs_tools::list_dir),
        false,
    )?;
    registry.register(
        spec("grep_files", "Search files under the workspace root with a regex.", false, Idempotency::Safe),
        handler!(fs_tools::grep_files),
        false,
    )?;
    registry.register(
        spec("file_write", "Write a file under the workspace root.", true, Idempotency::Unsafe),
        handler!(fs_tools::file_write),
        false,
    )?;
    registry.register(
        spec("apply_patch", "Apply a unified-diff-style patch to a file.", true, Idempotency::Unsafe),
        handler!(fs_tools::apply_patch),
        false,
    )?;
    registry.register(
        spec("shell_exec", "Run a shell command.", true, Idempotency::Unsafe),
        handler!(exec_tools::shell_exec),
        false,
    )?;
    registry.register(
        spec("exec_command", "Run an argv command directly.", true, Idempotency::Unsafe),
        handler!(exec_tools::exec_command),
        false,
    )?;
    registry.register(
        spec("write_stdin", "Write input to a running interactive session.", true, Idempotency::Unsafe),
        handler!(exec_tools::write_stdin),
        false,
    )?;
    registry.register(
        spec("update_plan", "Record the model's current step-by-step plan.", false, Idempotency::Unknown),
        handler!(misc_tools::update_plan),
        false,
    )?;
    registry.register(
        spec("request_user_input", "Ask the human operator a question.", false, Idempotency::Unknown),
        handler!(misc_tools::request_user_input),
        false,
    )?;
    registry.register(
        spec("view_image", "Read image metadata from the workspace.", false, Idempotency::Safe),
        handler!(misc_tools::view_image),
        false,
    )?;
    registry.register(
        spec("web_search", "Search the web.", false, Idempotency::Safe),
        handler!(misc_tools::web_search),
        false,
    )?;
    registry.register(
        spec("skill_exec", "Run a bundled skill entry point.", true, Idempotency::Unsafe),
        handler!(skill_tools::skill_exec),
        false,
    )?;
    registry.register(
        spec("skill_ref_read", "Read a skill's reference body.", false, Idempotency::Safe),
        handler!(skill_tools::skill_ref_read),
        false,
    )?;
    registry.register(
        spec("spawn_agent", "Start a nested agent run.", true, Idempotency::Unsafe),
        handler!(agent_tools::spawn_agent),
        false,
    )?;
    registry.register(
        spec("wait_agent", "Wait for a nested agent run to finish.", false, Idempotency::Safe),
        handler!(agent_tools::wait_agent),
        false,
    )?;
    registry.register(
        spec("send_input", "Send input to a nested agent run.", true, Idempotency::Unsafe),
        handler!(agent_tools::send_input),
        false,
    )?;
    registry.register(
        spec("close_agent", "Terminate a nested agent run.", true, Idempotency::Unsafe),
        handler!(agent_tools::close_agent),
        false,
    )?;
    registry.register(
        spec("resume_agent", "Resume a nested agent run.", true, Idempotency::Unsafe),
        handler!(agent_tools::resume_agent),
        false,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_the_canonical_set_without_duplicates() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry).unwrap();
        for name in [
            "read_file",
            "list_dir",
            "grep_files",
            "file_write",
            "apply_patch",
            "shell_exec",
            "exec_command",
            "write_stdin",
            "update_plan",
            "request_user_input",
            "view_image",
            "web_search",
            "skill_exec",
            "skill_ref_read",
            "spawn_agent",
            "wait_agent",
            "send_input",
            "close_agent",
            "resume_agent",
        ] {
            assert!(registry.contains(name), "missing built-in tool '{name}'");
        }
    }
}
