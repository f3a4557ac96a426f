//! Per-call allow/ask/deny policy decisions and the redaction pipeline (C3).

pub mod gate;
pub mod redact;
pub mod risk;

pub use gate::{Action, Decision, GateRequest, SafetyGate, SandboxPermission};
pub use redact::{redact_text, sanitize_args};
pub use risk::{evaluate_risk, is_dangerous_env_var, RiskLevel};
