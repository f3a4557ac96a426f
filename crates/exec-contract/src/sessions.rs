use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};

use crate::truncate::truncate_output;

#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub running: bool,
    pub truncated: bool,
}

#[async_trait::async_trait]
pub trait ExecSessions: Send + Sync {
    async fn spawn(
        &self,
        argv: Vec<String>,
        cwd: Option<PathBuf>,
        env: Option<HashMap<String, String>>,
        tty: bool,
    ) -> std::io::Result<SessionRef>;

    async fn write(&self, session_id: &str, chars: &str, yield_time_ms: u64, max_output_bytes: usize) -> Option<WriteOutcome>;

    async fn close(&self, session_id: &str);

    async fn close_all(&self);
}

struct SessionState {
    stdin: Mutex<Option<ChildStdin>>,
    stdout_buf: Mutex<Vec<u8>>,
    stderr_buf: Mutex<Vec<u8>>,
    exit_code: AtomicI32,
    has_exit_code: AtomicBool,
    running: AtomicBool,
}

/// Reference `ExecSessions` for a single run. Sessions are held in-process;
/// the no-PTY (`tty: false`) path is fully supported, `tty: true` is
/// accepted but falls back to a piped stdin/stdout (no real pty allocation).
#[derive(Default)]
pub struct InProcessExecSessions {
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,
}

impl InProcessExecSessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ExecSessions for InProcessExecSessions {
    async fn spawn(
        &self,
        argv: Vec<String>,
        cwd: Option<PathBuf>,
        env: Option<HashMap<String, String>>,
        tty: bool,
    ) -> std::io::Result<SessionRef> {
        if tty {
            tracing::debug!("pty allocation requested but not implemented; falling back to piped io");
        }

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = env {
            for (k, v) in env {
                cmd.env(k, v);
            }
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let session_id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(SessionState {
            stdin: Mutex::new(stdin),
            stdout_buf: Mutex::new(Vec::new()),
            stderr_buf: Mutex::new(Vec::new()),
            exit_code: AtomicI32::new(0),
            has_exit_code: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        if let Some(mut stdout) = stdout {
            let state = state.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => state.stdout_buf.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            });
        }
        if let Some(mut stderr) = stderr {
            let state = state.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => state.stderr_buf.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            });
        }

        {
            let state = state.clone();
            tokio::spawn(async move {
                let status = child.wait().await;
                if let Ok(status) = status {
                    state.exit_code.store(status.code().unwrap_or(-1), Ordering::SeqCst);
                    state.has_exit_code.store(true, Ordering::SeqCst);
                }
                state.running.store(false, Ordering::SeqCst);
            });
        }

        self.sessions.write().insert(session_id.clone(), state);
        Ok(SessionRef { session_id })
    }

    async fn write(&self, session_id: &str, chars: &str, yield_time_ms: u64, max_output_bytes: usize) -> Option<WriteOutcome> {
        let state = self.sessions.read().get(session_id).cloned()?;

        if !chars.is_empty() {
            // Take the handle out of the lock so no guard lives across the
            // writes.
            let stdin_taken = state.stdin.lock().take();
            if let Some(mut stdin) = stdin_taken {
                let _ = stdin.write_all(chars.as_bytes()).await;
                let _ = stdin.flush().await;
                *state.stdin.lock() = Some(stdin);
            }
        }

        if yield_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(yield_time_ms)).await;
        }

        let stdout_bytes = std::mem::take(&mut *state.stdout_buf.lock());
        let stderr_bytes = std::mem::take(&mut *state.stderr_buf.lock());
        let stdout_raw = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr_raw = String::from_utf8_lossy(&stderr_bytes).into_owned();
        let truncated_out = truncate_output(&stdout_raw, &stderr_raw, max_output_bytes, max_output_bytes * 2);

        let exit_code =
            if state.has_exit_code.load(Ordering::SeqCst) { Some(state.exit_code.load(Ordering::SeqCst)) } else { None };

        Some(WriteOutcome {
            stdout: truncated_out.stdout,
            stderr: truncated_out.stderr,
            exit_code,
            running: state.running.load(Ordering::SeqCst),
            truncated: truncated_out.truncated,
        })
    }

    async fn close(&self, session_id: &str) {
        if let Some(state) = self.sessions.write().remove(session_id) {
            *state.stdin.lock() = None;
        }
    }

    async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_write_reads_back_output() {
        let sessions = InProcessExecSessions::new();
        let session = sessions.spawn(vec!["cat".into()], None, None, false).await.unwrap();
        let outcome = sessions.write(&session.session_id, "hello\n", 200, 4096).await.unwrap();
        assert!(outcome.stdout.contains("hello"));
        assert!(outcome.running);
    }

    #[tokio::test]
    async fn write_against_unknown_session_returns_none() {
        let sessions = InProcessExecSessions::new();
        assert!(sessions.write("missing", "x", 10, 100).await.is_none());
    }

    #[tokio::test]
    async fn close_removes_session() {
        let sessions = InProcessExecSessions::new();
        let session = sessions.spawn(vec!["cat".into()], None, None, false).await.unwrap();
        sessions.close(&session.session_id).await;
        assert!(sessions.write(&session.session_id, "x", 10, 100).await.is_none());
    }

    #[tokio::test]
    async fn close_all_clears_every_session() {
        let sessions = InProcessExecSessions::new();
        let a = sessions.spawn(vec!["cat".into()], None, None, false).await.unwrap();
        let b = sessions.spawn(vec!["cat".into()], None, None, false).await.unwrap();
        sessions.close_all().await;
        assert!(sessions.write(&a.session_id, "x", 10, 100).await.is_none());
        assert!(sessions.write(&b.session_id, "x", 10, 100).await.is_none());
    }
}
