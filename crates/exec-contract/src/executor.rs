use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sa_engine_domain::tool::ErrorKind;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::truncate::{truncate_output, DEFAULT_COMBINED_CAP, DEFAULT_PER_STREAM_CAP};

/// Default grace period between SIGTERM and SIGKILL on timeout/cancellation.
pub const DEFAULT_TERM_GRACE_MS: u64 = 2000;
const POLL_INTERVAL_MS: u64 = 50;

/// Fail-open cancellation probe: an `Err` is treated as "not cancelled".
pub type CancelChecker = Arc<dyn Fn() -> Result<bool, String> + Send + Sync>;

fn is_cancelled(checker: &Option<CancelChecker>) -> bool {
    match checker {
        Some(f) => f().unwrap_or(false),
        None => false,
    }
}

pub struct CommandRequest {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub timeout_ms: u64,
    pub cancel_checker: Option<CancelChecker>,
    pub per_stream_cap: usize,
    pub combined_cap: usize,
}

impl CommandRequest {
    pub fn new(argv: Vec<String>, timeout_ms: u64) -> Self {
        Self {
            argv,
            cwd: None,
            env: None,
            timeout_ms,
            cancel_checker: None,
            per_stream_cap: DEFAULT_PER_STREAM_CAP,
            combined_cap: DEFAULT_COMBINED_CAP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timeout: bool,
    pub truncated: bool,
    pub error_kind: Option<ErrorKind>,
}

#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn run_command(&self, req: CommandRequest) -> CommandResult;
}

/// Reference `Executor` for a single run: spawns directly in-process,
/// placing the child in its own process group so a timeout or
/// cancellation can signal the whole group, not just the immediate
/// child. Timeouts escalate SIGTERM, then SIGKILL after the grace period.
pub struct InProcessExecutor {
    term_grace_ms: u64,
}

impl InProcessExecutor {
    pub fn new() -> Self {
        Self { term_grace_ms: DEFAULT_TERM_GRACE_MS }
    }

    pub fn with_term_grace_ms(mut self, ms: u64) -> Self {
        self.term_grace_ms = ms;
        self
    }
}

impl Default for InProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // A negative pid targets the process group; `process_group(0)` at spawn
    // time made this child its own group leader, so pid == pgid.
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: i32) {}

#[async_trait::async_trait]
impl Executor for InProcessExecutor {
    async fn run_command(&self, req: CommandRequest) -> CommandResult {
        let start = Instant::now();

        let mut cmd = Command::new(&req.argv[0]);
        cmd.args(&req.argv[1..]);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(cwd) = &req.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &req.env {
            for (k, v) in env {
                cmd.env(k, v);
            }
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return CommandResult {
                    ok: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("failed to spawn: {e}"),
                    duration_ms: start.elapsed().as_millis() as u64,
                    timeout: false,
                    truncated: false,
                    error_kind: Some(ErrorKind::NotFound),
                };
            }
        };

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut p) = stdout_pipe {
                let _ = p.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut p) = stderr_pipe {
                let _ = p.read_to_end(&mut buf).await;
            }
            buf
        });

        let deadline = start + Duration::from_millis(req.timeout_ms.max(1));
        let mut timed_out = false;
        let mut cancelled = false;
        let mut exit_status = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let tick = Duration::from_millis(POLL_INTERVAL_MS).min(deadline - now);
            tokio::select! {
                res = child.wait() => {
                    exit_status = res.ok();
                    break;
                }
                _ = tokio::time::sleep(tick) => {
                    if is_cancelled(&req.cancel_checker) {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if exit_status.is_none() && (timed_out || cancelled) {
            if let Some(pid) = child.id() {
                signal_group(pid, libc::SIGTERM);
            }
            let grace = tokio::time::timeout(Duration::from_millis(self.term_grace_ms), child.wait()).await;
            exit_status = match grace {
                Ok(res) => res.ok(),
                Err(_elapsed) => {
                    if let Some(pid) = child.id() {
                        signal_group(pid, libc::SIGKILL);
                    }
                    child.wait().await.ok()
                }
            };
        }

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();
        let stdout_raw = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr_raw = String::from_utf8_lossy(&stderr_bytes).into_owned();
        let truncated_out = truncate_output(&stdout_raw, &stderr_raw, req.per_stream_cap, req.combined_cap);

        let exit_code = exit_status.and_then(|s| s.code());
        let error_kind = if cancelled {
            Some(ErrorKind::Cancelled)
        } else if timed_out {
            Some(ErrorKind::Timeout)
        } else if exit_code.map(|c| c != 0).unwrap_or(true) {
            Some(ErrorKind::ExitCode)
        } else {
            None
        };

        CommandResult {
            ok: !timed_out && !cancelled && exit_code == Some(0),
            exit_code,
            stdout: truncated_out.stdout,
            stderr: truncated_out.stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            timeout: timed_out,
            truncated: truncated_out.truncated,
            error_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_command_to_completion() {
        let executor = InProcessExecutor::new();
        let req = CommandRequest::new(vec!["echo".into(), "hi".into()], 5000);
        let result = executor.run_command(req).await;
        assert!(result.ok);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hi"));
        assert!(result.error_kind.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_exit_code_error() {
        let executor = InProcessExecutor::new();
        let req = CommandRequest::new(vec!["sh".into(), "-c".into(), "exit 3".into()], 5000);
        let result = executor.run_command(req).await;
        assert!(!result.ok);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.error_kind, Some(ErrorKind::ExitCode));
    }

    #[tokio::test]
    async fn timeout_kills_long_running_command() {
        let executor = InProcessExecutor::new().with_term_grace_ms(100);
        let req = CommandRequest::new(vec!["sleep".into(), "5".into()], 100);
        let result = executor.run_command(req).await;
        assert!(result.timeout);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn cancellation_checker_stops_the_command() {
        let executor = InProcessExecutor::new().with_term_grace_ms(100);
        let checker: CancelChecker = Arc::new(|| Ok(true));
        let mut req = CommandRequest::new(vec!["sleep".into(), "5".into()], 5000);
        req.cancel_checker = Some(checker);
        let result = executor.run_command(req).await;
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn failing_cancel_checker_is_fail_open() {
        let executor = InProcessExecutor::new();
        let checker: CancelChecker = Arc::new(|| Err("boom".into()));
        let mut req = CommandRequest::new(vec!["echo".into(), "ok".into()], 5000);
        req.cancel_checker = Some(checker);
        let result = executor.run_command(req).await;
        assert!(result.ok);
    }
}
