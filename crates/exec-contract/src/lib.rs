//! Process-execution contracts (C9): one-shot commands (`Executor`) and
//! interactive background sessions (`ExecSessions`), plus a shared
//! tail-truncation policy.

pub mod executor;
pub mod sessions;
pub mod truncate;

pub use executor::{CancelChecker, CommandRequest, CommandResult, Executor, InProcessExecutor, DEFAULT_TERM_GRACE_MS};
pub use sessions::{ExecSessions, InProcessExecSessions, SessionRef, WriteOutcome};
pub use truncate::{truncate_output, TruncatedOutput, DEFAULT_COMBINED_CAP, DEFAULT_PER_STREAM_CAP};
