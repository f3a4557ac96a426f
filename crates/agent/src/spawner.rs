//! Nested-run coordination for `spawn_agent`/`wait_agent`/`close_agent`.
//! Each child run is single-shot: `spawn` starts it, `wait` observes its
//! terminal result. `send_input`/`resume` are accepted by the trait but
//! runs expose no mid-run input channel, so both report an error rather
//! than silently doing nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sa_engine_domain::{EngineError, Result};
use sa_engine_tools::AgentSpawner;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::result::{RunResult, RunStatus};

struct ChildHandle {
    watch_rx: watch::Receiver<Option<RunResult>>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Registry of in-flight/completed child runs, keyed by child `run_id`.
/// Holds only a [`Weak`] reference back to the owning [`Agent`] so a
/// spawned child never keeps its parent alive past the parent's own
/// lifetime.
#[derive(Clone)]
pub struct NestedRunRegistry {
    agent: Weak<Agent>,
    children: Arc<Mutex<HashMap<String, ChildHandle>>>,
}

impl NestedRunRegistry {
    pub fn new(agent: Weak<Agent>) -> Self {
        Self { agent, children: Arc::new(Mutex::new(HashMap::new())) }
    }
}

#[async_trait::async_trait]
impl AgentSpawner for NestedRunRegistry {
    async fn spawn(&self, goal: String) -> Result<String> {
        let agent = self.agent.upgrade().ok_or_else(|| EngineError::Other("parent agent no longer running".into()))?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(None);

        let child_run_id = run_id.clone();
        let join = tokio::spawn(async move {
            let outcome = agent.run(goal, Some(child_run_id), None).await;
            let result = outcome.unwrap_or_else(|e| RunResult::failed(e.to_string(), sa_engine_domain::tool::ErrorKind::Unknown, ""));
            let _ = tx.send(Some(result));
        });

        self.children.lock().insert(run_id.clone(), ChildHandle { watch_rx: rx, join: Arc::new(Mutex::new(Some(join))) });
        Ok(run_id)
    }

    async fn wait(&self, child_run_id: &str, timeout_ms: u64) -> Result<serde_json::Value> {
        let mut rx = {
            let children = self.children.lock();
            let handle = children.get(child_run_id).ok_or_else(|| EngineError::Other(format!("unknown child run '{child_run_id}'")))?;
            handle.watch_rx.clone()
        };

        let wait_fut = async {
            loop {
                if let Some(result) = rx.borrow().clone() {
                    return result;
                }
                if rx.changed().await.is_err() {
                    return RunResult::failed("child run task ended without a result", sa_engine_domain::tool::ErrorKind::Unknown, "");
                }
            }
        };

        match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), wait_fut).await {
            Ok(result) => Ok(serde_json::json!({
                "status": match result.status {
                    RunStatus::Completed => "completed",
                    RunStatus::Failed => "failed",
                    RunStatus::Cancelled => "cancelled",
                },
                "final_output": result.final_output,
                "wal_locator": result.wal_locator,
                "metadata": result.metadata,
            })),
            Err(_elapsed) => Err(EngineError::Other(format!("waiting on child run '{child_run_id}' timed out"))),
        }
    }

    async fn send_input(&self, child_run_id: &str, _text: String) -> Result<()> {
        if !self.children.lock().contains_key(child_run_id) {
            return Err(EngineError::Other(format!("unknown child run '{child_run_id}'")));
        }
        Err(EngineError::Other("nested runs are single-shot; mid-run input is not supported".into()))
    }

    async fn close(&self, child_run_id: &str) -> Result<()> {
        let join = {
            let children = self.children.lock();
            let handle = children.get(child_run_id).ok_or_else(|| EngineError::Other(format!("unknown child run '{child_run_id}'")))?;
            handle.join.clone()
        };
        if let Some(handle) = join.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn resume(&self, child_run_id: &str) -> Result<()> {
        if !self.children.lock().contains_key(child_run_id) {
            return Err(EngineError::Other(format!("unknown child run '{child_run_id}'")));
        }
        Err(EngineError::Other("nested runs are single-shot; resume is not supported".into()))
    }
}
