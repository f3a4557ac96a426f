use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `1-7` lowercase slug segments joined by `:`. Mentions in task text are
/// written `$[<namespace>].<skill_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn parse(raw: &str) -> Option<Self> {
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.is_empty() || segments.len() > 7 {
            return None;
        }
        let segment_re = segment_regex();
        if segments.iter().all(|s| segment_re.is_match(s)) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn segment_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,62}[a-z0-9])?$").unwrap())
}

/// A fully-scanned skill. `body_loader` is lazy and must never be invoked
/// during a scan — only during injection.
#[derive(Clone)]
pub struct Skill {
    pub space_id: String,
    pub source_id: String,
    pub namespace: Namespace,
    pub skill_name: String,
    pub description: String,
    pub locator: String,
    pub path: Option<String>,
    pub body_size: Option<u64>,
    pub body_loader: Arc<dyn Fn() -> std::io::Result<String> + Send + Sync>,
    pub required_env_vars: Vec<String>,
    pub metadata: serde_json::Value,
    pub scope: Option<String>,
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("space_id", &self.space_id)
            .field("source_id", &self.source_id)
            .field("namespace", &self.namespace)
            .field("skill_name", &self.skill_name)
            .field("locator", &self.locator)
            .field("required_env_vars", &self.required_env_vars)
            .finish()
    }
}

impl Skill {
    pub fn key(&self) -> (String, String) {
        (self.namespace.as_str().to_string(), self.skill_name.clone())
    }
}

/// A single issue raised during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanIssue {
    pub source_id: String,
    pub message: String,
}

/// Aggregate counters for a scan — no body bytes, no file handles, always
/// JSON-serializable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanStats {
    pub sources_scanned: usize,
    pub skills_found: usize,
    pub duration_ms: u64,
}

/// The only surface a scan produces. Metadata-only: no event or field here
/// may contain skill body bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub skills: Vec<ScannedSkillMeta>,
    pub errors: Vec<ScanIssue>,
    pub warnings: Vec<ScanIssue>,
    pub stats: ScanStats,
}

/// The serializable projection of a [`Skill`] used in a [`ScanReport`] —
/// deliberately excludes `body_loader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedSkillMeta {
    pub space_id: String,
    pub source_id: String,
    pub namespace: String,
    pub skill_name: String,
    pub description: String,
    pub locator: String,
    pub body_size: Option<u64>,
    pub required_env_vars: Vec<String>,
}

impl From<&Skill> for ScannedSkillMeta {
    fn from(s: &Skill) -> Self {
        Self {
            space_id: s.space_id.clone(),
            source_id: s.source_id.clone(),
            namespace: s.namespace.as_str().to_string(),
            skill_name: s.skill_name.clone(),
            description: s.description.clone(),
            locator: s.locator.clone(),
            body_size: s.body_size,
            required_env_vars: s.required_env_vars.clone(),
        }
    }
}

/// A `$[ns].name` mention extracted from task text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub raw: String,
    pub namespace: String,
    pub skill_name: String,
}

/// Extract all `$[ns].name` mentions from `text`. Strict slug grammar —
/// rejects `$PATH`-style tokens that don't use the `$[...]` bracket form.
pub fn extract_mentions(text: &str) -> Vec<Mention> {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\$\[([a-z0-9](?:[a-z0-9:-]{0,126}[a-z0-9])?)\]\.([a-z0-9_-]+)").unwrap()
    });
    re.captures_iter(text)
        .map(|c| Mention {
            raw: c[0].to_string(),
            namespace: c[1].to_string(),
            skill_name: c[2].to_string(),
        })
        .collect()
}
