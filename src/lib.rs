//! Skills-first agent execution engine: a deterministic, auditable agent
//! loop over an abstract `ChatBackend`, with typed tool dispatch, a
//! three-mode safety gate, approval caching, an append-only event journal,
//! pluggable skill sources, and context-overflow recovery.
//!
//! The engine is split into focused crates; this facade re-exports the
//! pieces most integrations need:
//!
//! - [`agent`] — the loop itself ([`Agent`], [`AgentBuilder`])
//! - [`domain`] — events, tool contracts, config, messages
//! - [`wal`] — journal backends, emitter, replay, fork
//! - [`tools`] — registry, dispatcher, built-in tool handlers
//! - [`safety`] / [`approval`] — policy decisions and approval flow
//! - [`skills`] — scanning, mention resolution, injection, bundles
//! - [`context_recovery`] — compaction and overflow handling
//! - [`exec`] — command and interactive-session contracts

pub use sa_engine_agent as agent;
pub use sa_engine_approval as approval;
pub use sa_engine_context as context_recovery;
pub use sa_engine_domain as domain;
pub use sa_engine_exec as exec;
pub use sa_engine_loop as loop_controller;
pub use sa_engine_safety as safety;
pub use sa_engine_skills as skills;
pub use sa_engine_tools as tools;
pub use sa_engine_wal as wal;

pub use sa_engine_agent::{Agent, AgentBuilder, RunOptions, RunResult, RunStatus};
pub use sa_engine_domain::{ChatBackend, Config, EngineError, Event, EventKind, Message};
