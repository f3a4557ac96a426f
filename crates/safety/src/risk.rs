#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    High,
}

const HIGH_RISK_PREFIXES: &[&[&str]] = &[
    &["rm", "-rf"],
    &["rm", "-fr"],
    &["sudo"],
    &["chmod", "777"],
    &["dd"],
    &["mkfs"],
    &["curl"],
    &["wget"],
];

const HIGH_RISK_SUBSTRINGS: &[&str] = &[":(){ :|:& };:", "> /dev/sda", "mkfs."];

/// Inspect an argv for well-known destructive or exfiltration-prone
/// patterns. A heuristic, not a sandbox — it only decides whether the
/// Safety Gate should fall through to `ask`.
pub fn evaluate_risk(argv: &[String]) -> RiskLevel {
    for prefix in HIGH_RISK_PREFIXES {
        if argv.len() >= prefix.len() && argv.iter().zip(prefix.iter()).all(|(a, b)| a == b) {
            return RiskLevel::High;
        }
    }
    let joined = argv.join(" ");
    if HIGH_RISK_SUBSTRINGS.iter().any(|s| joined.contains(s)) {
        return RiskLevel::High;
    }
    RiskLevel::Low
}

/// Environment variable names that can redirect dynamic linking, module
/// resolution, or shell startup — never allowed through to a child process
/// regardless of policy.
const BLOCKED_ENV_VARS: &[&str] = &[
    "LD_PRELOAD", "LD_LIBRARY_PATH", "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES", "DYLD_LIBRARY_PATH", "DYLD_FRAMEWORK_PATH",
    "PATH", "HOME", "USER", "SHELL",
    "SSH_AUTH_SOCK", "SSH_AGENT_PID",
    "PYTHONPATH", "PYTHONSTARTUP", "PYTHONHOME",
    "NODE_PATH", "NODE_OPTIONS",
    "RUBYLIB", "RUBYOPT",
    "PERL5LIB", "PERL5OPT",
    "CLASSPATH",
    "BASH_ENV", "ENV", "CDPATH",
    "IFS",
];

pub fn is_dangerous_env_var(name: &str) -> bool {
    BLOCKED_ENV_VARS.contains(&name.to_ascii_uppercase().as_str())
}
