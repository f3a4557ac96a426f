//! Built-in tools and dispatch for the skills-first agent execution engine.
//!
//! `registry` holds the name-keyed `ToolSpec`/handler pairs; `context`
//! defines the capabilities (`Executor`, `ExecSessions`, skills, nested
//! agents, web search, human IO) a handler may reach for; `dispatcher`
//! implements the seven-step dispatch algorithm (request, validate, gate,
//! approve, start, invoke, finish) on top of both.

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod registry;
pub mod workspace;

pub use context::{AgentSpawner, ExecutionContext, HumanIoProvider, SkillAccess, WebSearchProvider};
pub use dispatcher::{DispatchOutcome, DispatchResult, Dispatcher};
pub use handlers::register_builtin_tools;
pub use registry::{Handler, HandlerFuture, RegisterError, ToolRegistry};
pub use workspace::resolve_path;
