//! Append-only event journal (C1): backend, emitter, replay, and fork.

pub mod backend;
pub mod emitter;
pub mod replay;

pub use backend::{event_to_line, FileWalBackend, MemoryWalBackend, WalBackend};
pub use emitter::WalEmitter;
pub use replay::{fork_run, replay_lines, ReplayResult};
