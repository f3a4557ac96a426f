//! Source trait and the two in-process implementations (filesystem,
//! in-memory). Network-backed sources (`redis`, `pgsql`) live in
//! `kv_source.rs` / `sql_source.rs`, generic over a narrow client port so
//! this crate never depends on a concrete driver.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Result, SkillError};

/// One scanned skill, before the manager has attached `space_id` and
/// `namespace` (those come from the enclosing `SkillSpaceConfig`, not the
/// source). `body_loader` must not be invoked during a scan.
#[derive(Clone)]
pub struct RawSkill {
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

impl std::fmt::Debug for RawSkill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSkill")
            .field("skill_name", &self.skill_name)
            .field("locator", &self.locator)
            .field("required_env_vars", &self.required_env_vars)
            .finish()
    }
}

/// Bytes fetched for bundle extraction, paired with the sha256 the caller
/// declared so `bundle.rs` can verify it before touching the disk.
pub struct FetchedBundle {
    pub bytes: Vec<u8>,
    pub declared_sha256: String,
}

/// A scan-and-optionally-bundle capable skill origin. Body loading is
/// carried per-skill by `RawSkill::body_loader`, so the trait itself only
/// needs `scan` and the optional `get_bundle`.
#[async_trait::async_trait]
pub trait SkillSource: Send + Sync {
    fn id(&self) -> &str;

    async fn scan(&self) -> Result<Vec<RawSkill>>;

    async fn get_bundle(&self, _skill_name: &str) -> Result<Option<FetchedBundle>> {
        Ok(None)
    }
}

/// Frontmatter schema for a filesystem skill: `name`,
/// `description`, `required_env_vars`, `metadata.actions`, `scope`.
#[derive(Debug, Clone, Deserialize, Default)]
struct SkillFrontmatter {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required_env_vars: Vec<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    scope: Option<String>,
}

/// Splits a SKILL.md file into `(frontmatter, body)`. The body is whatever
/// follows the closing `---` line, untouched.
fn split_frontmatter(content: &str) -> (Option<SkillFrontmatter>, String) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (None, content.to_string());
    }
    let after_open = &trimmed[3..];
    let Some(close_idx) = after_open.find("\n---") else {
        return (None, content.to_string());
    };
    let yaml_str = &after_open[..close_idx];
    let body = after_open[close_idx + 4..].trim_start_matches('\n').to_string();
    match serde_yaml::from_str::<SkillFrontmatter>(yaml_str) {
        Ok(fm) => (Some(fm), body),
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse SKILL.md frontmatter");
            (None, content.to_string())
        }
    }
}

fn load_body_from_path(path: PathBuf) -> std::io::Result<String> {
    let content = fs::read_to_string(&path)?;
    Ok(split_frontmatter(&content).1)
}

/// Discovers `SKILL.md` files under a root directory, one directory deep
/// per skill (`<root>/<skill-dir>/SKILL.md`).
pub struct FilesystemSource {
    id: String,
    root: PathBuf,
}

impl FilesystemSource {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self { id: id.into(), root: root.into() }
    }
}

#[async_trait::async_trait]
impl SkillSource for FilesystemSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn scan(&self) -> Result<Vec<RawSkill>> {
        scan_filesystem(&self.root)
    }
}

fn scan_filesystem(root: &Path) -> Result<Vec<RawSkill>> {
    let mut found = Vec::new();
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let skill_dir = entry.path();
        if !skill_dir.is_dir() {
            continue;
        }
        let manifest_path = skill_dir.join("SKILL.md");
        if !manifest_path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&manifest_path)?;
        let (frontmatter, body) = split_frontmatter(&content);
        let Some(fm) = frontmatter else {
            tracing::warn!(path = %manifest_path.display(), "SKILL.md has no valid frontmatter, skipping");
            continue;
        };
        let Some(name) = fm.name else {
            tracing::warn!(path = %manifest_path.display(), "SKILL.md frontmatter missing 'name', skipping");
            continue;
        };
        let path_for_loader = manifest_path.clone();
        found.push(RawSkill {
            skill_name: name,
            description: fm.description,
            locator: manifest_path.display().to_string(),
            path: Some(manifest_path.display().to_string()),
            body_size: Some(body.len() as u64),
            body_loader: Arc::new(move || load_body_from_path(path_for_loader.clone())),
            required_env_vars: fm.required_env_vars,
            metadata: fm.metadata,
            scope: fm.scope,
        });
    }
    found.sort_by(|a, b| a.skill_name.cmp(&b.skill_name));
    Ok(found)
}

/// A pre-registered skill, keyed by name within the owning `InMemorySource`.
#[derive(Clone)]
pub struct InMemorySkill {
    pub skill_name: String,
    pub description: String,
    pub body: String,
    pub required_env_vars: Vec<String>,
    pub metadata: serde_json::Value,
    pub scope: Option<String>,
}

/// Skills registered directly in process memory — used for tests and for
/// skills synthesized by the host application rather than discovered on
/// disk or fetched over the network.
pub struct InMemorySource {
    id: String,
    skills: Vec<InMemorySkill>,
}

impl InMemorySource {
    pub fn new(id: impl Into<String>, skills: Vec<InMemorySkill>) -> Self {
        Self { id: id.into(), skills }
    }
}

#[async_trait::async_trait]
impl SkillSource for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn scan(&self) -> Result<Vec<RawSkill>> {
        Ok(self
            .skills
            .iter()
            .cloned()
            .map(|s| {
                let body = s.body;
                RawSkill {
                    skill_name: s.skill_name.clone(),
                    description: s.description,
                    locator: format!("memory:{}", s.skill_name),
                    path: None,
                    body_size: Some(body.len() as u64),
                    body_loader: Arc::new(move || Ok(body.clone())),
                    required_env_vars: s.required_env_vars,
                    metadata: s.metadata,
                    scope: s.scope,
                }
            })
            .collect())
    }
}

/// Shared guard used by every `get_bundle` implementation: rejects anything
/// that isn't already known-missing so sources that genuinely have no
/// bundle concept don't need to repeat the error.
pub fn no_bundle_support(source_id: &str) -> Result<Option<FetchedBundle>> {
    Err(SkillError::NoBundleSupport(source_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filesystem_source_discovers_skill_with_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("greet");
        fs::create_dir(&skill_dir).unwrap();
        fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: greet\ndescription: says hello\nrequired_env_vars: [GREETING]\nscope: demo\n---\nbody text here\n",
        )
        .unwrap();

        let source = FilesystemSource::new("fs1", dir.path());
        let skills = source.scan().await.unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].skill_name, "greet");
        assert_eq!(skills[0].required_env_vars, vec!["GREETING".to_string()]);
        let body = (skills[0].body_loader)().unwrap();
        assert_eq!(body.trim(), "body text here");
    }

    #[tokio::test]
    async fn filesystem_source_skips_directories_without_a_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("not-a-skill")).unwrap();
        let source = FilesystemSource::new("fs1", dir.path());
        assert!(source.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filesystem_source_on_missing_root_returns_empty() {
        let source = FilesystemSource::new("fs1", "/does/not/exist/at/all");
        assert!(source.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_source_round_trips_body() {
        let source = InMemorySource::new(
            "mem1",
            vec![InMemorySkill {
                skill_name: "echo".into(),
                description: "echoes input".into(),
                body: "do the thing".into(),
                required_env_vars: vec![],
                metadata: serde_json::json!({}),
                scope: None,
            }],
        );
        let skills = source.scan().await.unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!((skills[0].body_loader)().unwrap(), "do the thing");
    }
}
