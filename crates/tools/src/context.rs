use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sa_engine_domain::Result;
use sa_engine_exec::{CancelChecker, ExecSessions, Executor};

use crate::workspace::resolve_path;

/// A single mention-resolved skill body ready for a tool to read or run,
/// decoupling the tools crate from the Skills Manager's concrete types.
#[async_trait::async_trait]
pub trait SkillAccess: Send + Sync {
    async fn read_body(&self, namespace: &str, skill_name: &str) -> Result<String>;
    async fn run_bundle_entry(&self, namespace: &str, skill_name: &str, entry: &str, args: &[String]) -> Result<String>;
}

/// Nested-run coordination for the multi-agent tools (`spawn_agent` and
/// friends). Implemented by the agent crate, which is the only component
/// that knows how to start another run.
#[async_trait::async_trait]
pub trait AgentSpawner: Send + Sync {
    async fn spawn(&self, goal: String) -> Result<String>;
    async fn wait(&self, child_run_id: &str, timeout_ms: u64) -> Result<serde_json::Value>;
    async fn send_input(&self, child_run_id: &str, text: String) -> Result<()>;
    async fn close(&self, child_run_id: &str) -> Result<()>;
    async fn resume(&self, child_run_id: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

#[async_trait::async_trait]
pub trait HumanIoProvider: Send + Sync {
    async fn request_human_input(&self, prompt: &str) -> Result<String>;
}

/// Everything a tool handler needs, injected per call. Handlers never
/// reach into global state: each is a pure function of
/// `(ToolCall, Context) -> ToolResult`.
pub struct ExecutionContext {
    pub workspace_root: PathBuf,
    pub known_secrets: Vec<String>,
    pub env: HashMap<String, String>,
    pub cancel_checker: Option<CancelChecker>,
    pub default_timeout_ms: u64,
    pub executor: Option<Arc<dyn Executor>>,
    pub exec_sessions: Option<Arc<dyn ExecSessions>>,
    pub skills: Option<Arc<dyn SkillAccess>>,
    pub agents: Option<Arc<dyn AgentSpawner>>,
    pub web_search: Option<Arc<dyn WebSearchProvider>>,
    pub human_io: Option<Arc<dyn HumanIoProvider>>,
}

impl ExecutionContext {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            known_secrets: Vec::new(),
            env: HashMap::new(),
            cancel_checker: None,
            default_timeout_ms: 30_000,
            executor: None,
            exec_sessions: None,
            skills: None,
            agents: None,
            web_search: None,
            human_io: None,
        }
    }

    pub fn resolve_path(&self, requested: &str) -> std::result::Result<PathBuf, String> {
        resolve_path(&self.workspace_root, requested)
    }
}
