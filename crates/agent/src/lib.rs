//! The agent loop (C8): turn-by-turn orchestration of LLM streaming, tool
//! dispatch, approval gating, budget enforcement, skill injection, and
//! context-overflow recovery over an abstract `ChatBackend`.

pub mod agent;
pub mod human_io;
pub mod prompt;
pub mod recovery_adapters;
pub mod result;
pub mod skill_access;
pub mod spawner;
pub mod web_search;

pub use agent::{Agent, AgentBuilder, RunEventIter, RunOptions, RUNTIME_DIR};
pub use human_io::{NullHumanIoProvider, StdinHumanIoProvider};
pub use recovery_adapters::{ChatBackendSummarizer, HumanIoChoiceAdapter};
pub use result::{RunResult, RunStatus};
pub use skill_access::SkillAccessAdapter;
pub use spawner::NestedRunRegistry;
pub use web_search::NullWebSearchProvider;
