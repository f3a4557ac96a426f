use sa_engine_domain::config::SafetyConfig;

use crate::risk::{evaluate_risk, RiskLevel};

/// `{ action: allow|ask|deny, reason, matched_rule?, ... }` — the Safety
/// Gate's per-call decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Allow,
    Ask,
    Deny,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub matched_rule: String,
}

/// Whether sandbox permissions force an `ask` regardless of allowlisting.
/// Set by the dispatcher from the run's `sandbox` config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxPermission {
    #[default]
    Normal,
    RequireEscalated,
}

/// Everything the gate needs about one call. `argv` is populated only for
/// shell-like tools (`shell_exec`, `exec_command`); custom tools resolve
/// only against `tool_allowlist`/`tool_denylist`; the argv lists never
/// apply to a custom tool, even when its name matches an argv entry.
#[derive(Debug, Clone)]
pub struct GateRequest<'a> {
    pub tool_name: &'a str,
    pub argv: Option<&'a [String]>,
    pub sandbox: SandboxPermission,
}

/// Three-mode policy engine: allow/ask/deny, allow/deny lists, fail-closed
/// on lookup failure.
pub struct SafetyGate {
    config: SafetyConfig,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    /// Decision order is first-match-wins and exhaustive: denylist, then
    /// global deny, then sandbox escalation, then allowlist, then global
    /// allow, then risk=high, then the mode default.
    pub fn decide(&self, req: &GateRequest<'_>) -> Decision {
        // 1. Denylist (tool-name for custom tools, argv prefix for shell-like).
        if let Some(matched) = self.denylist_match(req) {
            return Decision { action: Action::Deny, reason: format!("matches denylist entry '{matched}'"), matched_rule: "denylist".into() };
        }

        // 2. Global mode=deny.
        if self.config.mode == sa_engine_domain::config::SafetyMode::Deny {
            return Decision { action: Action::Deny, reason: "safety mode is deny".into(), matched_rule: "mode=deny".into() };
        }

        // 3. Sandbox escalation required — ask even if allow-listed.
        if req.sandbox == SandboxPermission::RequireEscalated {
            return Decision { action: Action::Ask, reason: "sandbox requires escalated permission".into(), matched_rule: "sandbox=require_escalated".into() };
        }

        // 4. Allowlist hit.
        if let Some(matched) = self.allowlist_match(req) {
            return Decision { action: Action::Allow, reason: format!("matches allowlist entry '{matched}'"), matched_rule: "allowlist".into() };
        }

        // 5. Global mode=allow.
        if self.config.mode == sa_engine_domain::config::SafetyMode::Allow {
            return Decision { action: Action::Allow, reason: "safety mode is allow".into(), matched_rule: "mode=allow".into() };
        }

        // 6. High risk from the argv risk evaluator.
        if let Some(argv) = req.argv {
            if evaluate_risk(argv) == RiskLevel::High {
                return Decision { action: Action::Ask, reason: "command classified as high risk".into(), matched_rule: "risk=high".into() };
            }
        }

        // 7. Default.
        Decision { action: Action::Ask, reason: "default policy".into(), matched_rule: "mode=ask".into() }
    }

    fn denylist_match(&self, req: &GateRequest<'_>) -> Option<String> {
        if req.argv.is_some() {
            argv_prefix_match(req.argv.unwrap(), &self.config.denylist)
        } else {
            name_match(req.tool_name, &self.config.tool_denylist)
        }
    }

    fn allowlist_match(&self, req: &GateRequest<'_>) -> Option<String> {
        if req.argv.is_some() {
            argv_prefix_match(req.argv.unwrap(), &self.config.allowlist)
        } else {
            name_match(req.tool_name, &self.config.tool_allowlist)
        }
    }
}

fn name_match(name: &str, list: &[String]) -> Option<String> {
    list.iter().find(|entry| entry.as_str() == name).cloned()
}

fn argv_prefix_match(argv: &[String], list: &[String]) -> Option<String> {
    let joined = argv.join(" ");
    list.iter().find(|entry| joined.starts_with(entry.as_str()) || argv.first().map(|a0| a0 == *entry).unwrap_or(false)).cloned()
}
