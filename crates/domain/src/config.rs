use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration surface. Unknown keys at any level
/// cause load to fail — every struct below carries `deny_unknown_fields`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub max_wall_time_sec: Option<u64>,
    #[serde(default = "d_human_timeout_ms")]
    pub human_timeout_ms: u64,
    #[serde(default)]
    pub resume_strategy: ResumeStrategy,
    #[serde(default)]
    pub context_recovery: ContextRecoveryConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: d_max_steps(),
            max_wall_time_sec: None,
            human_timeout_ms: d_human_timeout_ms(),
            resume_strategy: ResumeStrategy::default(),
            context_recovery: ContextRecoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStrategy {
    #[default]
    Summary,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextRecoveryConfig {
    #[serde(default)]
    pub mode: ContextRecoveryMode,
    #[serde(default = "d_max_compactions")]
    pub max_compactions_per_run: u32,
    #[serde(default)]
    pub ask_first_fallback_mode: ContextRecoveryMode,
    #[serde(default = "d_history_max_chars")]
    pub compaction_history_max_chars: usize,
    #[serde(default = "d_keep_last_messages")]
    pub compaction_keep_last_messages: usize,
    #[serde(default = "d_extra_steps")]
    pub increase_budget_extra_steps: u32,
    #[serde(default)]
    pub increase_budget_extra_wall_time_sec: u64,
}

impl Default for ContextRecoveryConfig {
    fn default() -> Self {
        Self {
            mode: ContextRecoveryMode::CompactFirst,
            max_compactions_per_run: d_max_compactions(),
            ask_first_fallback_mode: ContextRecoveryMode::CompactFirst,
            compaction_history_max_chars: d_history_max_chars(),
            compaction_keep_last_messages: d_keep_last_messages(),
            increase_budget_extra_steps: d_extra_steps(),
            increase_budget_extra_wall_time_sec: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextRecoveryMode {
    #[default]
    CompactFirst,
    AskFirst,
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    #[serde(default)]
    pub mode: SafetyMode,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub tool_allowlist: Vec<String>,
    #[serde(default)]
    pub tool_denylist: Vec<String>,
    #[serde(default = "d_approval_timeout_ms")]
    pub approval_timeout_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            mode: SafetyMode::Ask,
            allowlist: Vec::new(),
            denylist: Vec::new(),
            tool_allowlist: Vec::new(),
            tool_denylist: Vec::new(),
            approval_timeout_ms: d_approval_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    Allow,
    #[default]
    Ask,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    #[serde(default)]
    pub default_policy: SandboxPolicy,
    #[serde(default)]
    pub profile: SandboxProfile,
    #[serde(default)]
    pub os: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPolicy {
    #[default]
    None,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxProfile {
    #[default]
    Dev,
    Balanced,
    Prod,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SkillsConfig {
    #[serde(default)]
    pub strictness: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub spaces: Vec<SkillSpaceConfig>,
    #[serde(default)]
    pub sources: Vec<SkillSourceConfig>,
    #[serde(default)]
    pub scan: SkillScanConfig,
    #[serde(default)]
    pub injection: SkillInjectionConfig,
    #[serde(default)]
    pub bundles: SkillBundlesConfig,
    #[serde(default)]
    pub actions: FeatureToggle,
    #[serde(default)]
    pub references: ReferencesConfig,
    #[serde(default)]
    pub env_var_missing_policy: EnvVarMissingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillSpaceConfig {
    pub id: String,
    pub namespace: String,
    pub sources: Vec<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillSourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SkillSourceKind,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSourceKind {
    Filesystem,
    Memory,
    Redis,
    Pgsql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillScanConfig {
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    #[serde(default = "d_ttl_sec")]
    pub ttl_sec: u64,
}

impl Default for SkillScanConfig {
    fn default() -> Self {
        Self { refresh_policy: RefreshPolicy::default(), ttl_sec: d_ttl_sec() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    Always,
    #[default]
    Ttl,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SkillInjectionConfig {
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillBundlesConfig {
    #[serde(default = "d_bundle_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "d_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for SkillBundlesConfig {
    fn default() -> Self {
        Self { max_bytes: d_bundle_max_bytes(), cache_dir: d_cache_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FeatureToggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferencesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_assets: bool,
    #[serde(default = "d_ref_max_bytes")]
    pub default_max_bytes: u64,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self { enabled: false, allow_assets: false, default_max_bytes: d_ref_max_bytes() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvVarMissingPolicy {
    #[default]
    AskHuman,
    FailFast,
    SkipSkill,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub system_text: Option<String>,
    #[serde(default)]
    pub developer_text: Option<String>,
    #[serde(default)]
    pub system_path: Option<PathBuf>,
    #[serde(default)]
    pub developer_path: Option<PathBuf>,
    #[serde(default)]
    pub include_skills_list: bool,
    #[serde(default)]
    pub history: PromptHistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptHistoryConfig {
    #[serde(default = "d_history_max_messages")]
    pub max_messages: usize,
    #[serde(default = "d_history_max_chars")]
    pub max_chars: usize,
}

impl Default for PromptHistoryConfig {
    fn default() -> Self {
        Self { max_messages: d_history_max_messages(), max_chars: d_history_max_chars() }
    }
}

fn d_max_steps() -> u32 { 50 }
fn d_human_timeout_ms() -> u64 { 60_000 }
fn d_max_compactions() -> u32 { 3 }
fn d_history_max_chars() -> usize { 60_000 }
fn d_keep_last_messages() -> usize { 6 }
fn d_extra_steps() -> u32 { 25 }
fn d_approval_timeout_ms() -> u64 { 60_000 }
fn d_ttl_sec() -> u64 { 60 }
fn d_bundle_max_bytes() -> u64 { 8 * 1024 * 1024 }
fn d_cache_dir() -> PathBuf { PathBuf::from("./.agent-runtime/bundles") }
fn d_ref_max_bytes() -> u64 { 1024 * 1024 }
fn d_history_max_messages() -> usize { 100 }
fn d_true() -> bool { true }

/// Load and parse a TOML config file, rejecting unknown keys at any level.
pub fn load_config(raw: &str) -> Result<Config, toml_edit_error::ConfigError> {
    toml::from_str(raw).map_err(toml_edit_error::ConfigError::from)
}

/// A thin wrapper so the public error type doesn't leak `toml::de::Error`
/// directly (keeps the dependency swappable without a breaking change).
pub mod toml_edit_error {
    #[derive(Debug, thiserror::Error)]
    #[error("config: {0}")]
    pub struct ConfigError(String);

    impl From<toml::de::Error> for ConfigError {
        fn from(e: toml::de::Error) -> Self {
            Self(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.run.max_steps, 50);
        assert_eq!(cfg.safety.mode, SafetyMode::Ask);
        assert_eq!(cfg.run.context_recovery.mode, ContextRecoveryMode::CompactFirst);
    }

    #[test]
    fn unknown_top_level_key_rejected() {
        let raw = "bogus_key = 1\n";
        assert!(load_config(raw).is_err());
    }

    #[test]
    fn unknown_nested_key_rejected() {
        let raw = "[run]\nmax_steps = 10\nbogus = true\n";
        assert!(load_config(raw).is_err());
    }

    #[test]
    fn partial_config_loads_with_defaults() {
        let raw = "[safety]\nmode = \"deny\"\n";
        let cfg = load_config(raw).unwrap();
        assert_eq!(cfg.safety.mode, SafetyMode::Deny);
        assert_eq!(cfg.run.max_steps, 50);
    }
}
