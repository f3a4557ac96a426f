//! Core types shared across the skills-first agent execution engine:
//! events, tool contracts, skills, approvals, run state, and config.

pub mod approval;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod run;
pub mod skill;
pub mod tool;

pub use approval::{ApprovalDecision, ApprovalRecord, ApprovalRequest};
pub use chat::{BoxStream, ChatBackend, ChatRequest, FinishReason, RawToolCall, StreamEvent};
pub use config::Config;
pub use error::{EngineError, Result};
pub use event::{Event, EventKind};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use run::{EnvSource, EnvStore, EventSink, RunContext};
pub use skill::{extract_mentions, Mention, Namespace, ScanIssue, ScanReport, ScanStats, ScannedSkillMeta, Skill};
pub use tool::{ErrorKind, Idempotency, ToolCall, ToolResult, ToolResultPayload, ToolSpec};
