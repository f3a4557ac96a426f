//! Aggregates skill sources into one scan/lookup/injection surface:
//! N polymorphic sources fanned across M namespaced spaces, behind an
//! `RwLock`-guarded scan cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use sa_engine_domain::config::{EnvVarMissingPolicy, RefreshPolicy, SkillsConfig};
use sa_engine_domain::{EnvSource, EnvStore, Namespace, ScanIssue, ScanReport, ScanStats, ScannedSkillMeta, Skill};

use crate::bundle::{extract_bundle, BundleLimits};
use crate::error::{Result, SkillError};
use crate::source::SkillSource;

struct SpaceDef {
    id: String,
    namespace: String,
    source_ids: Vec<String>,
}

#[derive(Clone)]
struct CachedScan {
    scanned_at: Instant,
    by_key: HashMap<(String, String), Skill>,
    report: ScanReport,
}

/// Outcome of checking a skill's `required_env_vars` against a run's
/// `EnvStore`. The policy decision — ask a human, fail the run,
/// or silently skip the skill — belongs to the caller, which is the only
/// place with access to a `HumanIoProvider`; the manager only reports facts.
pub enum EnvVarOutcome {
    Resolved(Vec<(String, String, EnvSource)>),
    Missing(Vec<String>),
}

pub struct SkillsManager {
    spaces: Vec<SpaceDef>,
    sources: HashMap<String, Arc<dyn SkillSource>>,
    refresh_policy: RefreshPolicy,
    ttl: Duration,
    injection_max_bytes: Option<usize>,
    env_var_missing_policy: EnvVarMissingPolicy,
    bundle_cache_root: PathBuf,
    bundle_max_bytes: u64,
    cache: RwLock<Option<Arc<CachedScan>>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SkillsManager {
    /// `sources` maps each `SkillSourceConfig.id` to the already-constructed
    /// source (filesystem/in-memory built here, redis/pgsql built by the
    /// caller since they carry a concrete client this crate never sees).
    pub fn new(config: &SkillsConfig, sources: HashMap<String, Arc<dyn SkillSource>>) -> Result<Self> {
        let mut spaces = Vec::with_capacity(config.spaces.len());
        for space in config.spaces.iter().filter(|s| s.enabled) {
            if Namespace::parse(&space.namespace).is_none() {
                return Err(SkillError::SpaceNotConfigured(space.namespace.clone()));
            }
            spaces.push(SpaceDef { id: space.id.clone(), namespace: space.namespace.clone(), source_ids: space.sources.clone() });
        }
        Ok(Self {
            spaces,
            sources,
            refresh_policy: config.scan.refresh_policy,
            ttl: Duration::from_secs(config.scan.ttl_sec),
            injection_max_bytes: config.injection.max_bytes,
            env_var_missing_policy: config.env_var_missing_policy,
            bundle_cache_root: config.bundles.cache_dir.clone(),
            bundle_max_bytes: config.bundles.max_bytes,
            cache: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn env_var_missing_policy(&self) -> EnvVarMissingPolicy {
        self.env_var_missing_policy
    }

    /// Current scan report, honoring the configured refresh policy.
    pub async fn scan_report(&self) -> Result<ScanReport> {
        Ok(self.ensure_fresh().await?.report.clone())
    }

    /// Forces a fresh scan regardless of policy — the only way a `manual`
    /// space ever advances past its bootstrap scan.
    pub async fn refresh(&self) -> Result<ScanReport> {
        Ok(self.force_refresh().await?.report.clone())
    }

    pub async fn resolve_mentions(&self, text: &str) -> Result<Vec<Skill>> {
        let mentions = sa_engine_domain::extract_mentions(text);
        if mentions.is_empty() {
            return Ok(Vec::new());
        }
        let cached = self.ensure_fresh().await?;
        let mut out = Vec::with_capacity(mentions.len());
        for mention in mentions {
            if !self.spaces.iter().any(|s| s.namespace == mention.namespace) {
                return Err(SkillError::SpaceNotConfigured(mention.namespace));
            }
            let key = (mention.namespace.clone(), mention.skill_name.clone());
            let skill = cached
                .by_key
                .get(&key)
                .cloned()
                .ok_or(SkillError::Unknown { namespace: mention.namespace, skill_name: mention.skill_name })?;
            out.push(skill);
        }
        Ok(out)
    }

    pub async fn resolve_skill(&self, namespace: &str, skill_name: &str) -> Result<Skill> {
        if !self.spaces.iter().any(|s| s.namespace == namespace) {
            return Err(SkillError::SpaceNotConfigured(namespace.to_string()));
        }
        let cached = self.ensure_fresh().await?;
        cached
            .by_key
            .get(&(namespace.to_string(), skill_name.to_string()))
            .cloned()
            .ok_or_else(|| SkillError::Unknown { namespace: namespace.to_string(), skill_name: skill_name.to_string() })
    }

    /// Loads the body (invoking `body_loader`, the one place it's allowed to
    /// run) and wraps it in the stable injection envelope.
    pub fn inject(&self, skill: &Skill) -> Result<String> {
        let body = (skill.body_loader)()?;
        if let Some(max) = self.injection_max_bytes {
            if body.len() > max {
                return Err(SkillError::BodyTooLarge { actual: body.len() as u64, limit: max as u64 });
            }
        }
        let path = skill.path.clone().unwrap_or_else(|| skill.locator.clone());
        Ok(format!("<skill><name>{}</name><path>{}</path>{}</skill>", skill.skill_name, path, body))
    }

    /// Raw body, unwrapped — used by `skill_ref_read`, which wants the
    /// content itself rather than a prompt-ready envelope.
    pub fn read_body(&self, skill: &Skill) -> Result<String> {
        Ok((skill.body_loader)()?)
    }

    pub fn resolve_env_vars(&self, skill: &Skill, env_store: &EnvStore) -> EnvVarOutcome {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for var in &skill.required_env_vars {
            match env_store.resolve(var) {
                Some((value, source)) => resolved.push((var.clone(), value, source)),
                None => missing.push(var.clone()),
            }
        }
        if missing.is_empty() {
            EnvVarOutcome::Resolved(resolved)
        } else {
            EnvVarOutcome::Missing(missing)
        }
    }

    /// Fetches and extracts a skill's bundle, returning the directory it was
    /// staged into. Callers combine this with an entry name under
    /// `<dir>/actions/` and an `Executor` to actually run it — this crate
    /// has no executor dependency of its own.
    pub async fn extract_bundle_for(&self, skill: &Skill) -> Result<PathBuf> {
        let source = self
            .sources
            .get(&skill.source_id)
            .ok_or_else(|| SkillError::Unknown { namespace: skill.namespace.as_str().to_string(), skill_name: skill.skill_name.clone() })?;
        let fetched = source
            .get_bundle(&skill.skill_name)
            .await?
            .ok_or_else(|| SkillError::NoBundleSupport(skill.source_id.clone()))?;
        let limits = BundleLimits::from_input_size(self.bundle_max_bytes);
        extract_bundle(&fetched.bytes, &fetched.declared_sha256, &self.bundle_cache_root, &limits)
    }

    async fn ensure_fresh(&self) -> Result<Arc<CachedScan>> {
        match self.refresh_policy {
            RefreshPolicy::Always => self.force_refresh().await,
            RefreshPolicy::Manual => {
                if let Some(cached) = self.cache.read().clone() {
                    return Ok(cached);
                }
                self.force_refresh().await
            }
            RefreshPolicy::Ttl => {
                if let Some(cached) = self.fresh_cached() {
                    return Ok(cached);
                }
                let _guard = self.refresh_lock.lock().await;
                if let Some(cached) = self.fresh_cached() {
                    return Ok(cached);
                }
                match self.full_scan().await {
                    Ok((by_key, report)) => {
                        let cached = Arc::new(CachedScan { scanned_at: Instant::now(), by_key, report });
                        *self.cache.write() = Some(cached.clone());
                        Ok(cached)
                    }
                    Err(e) => {
                        if let Some(stale) = self.cache.read().clone() {
                            tracing::warn!(error = %e, "skill refresh failed, serving cached scan");
                            let mut report = stale.report.clone();
                            report.warnings.push(ScanIssue {
                                source_id: "*".to_string(),
                                message: format!("refresh failed, serving cached scan: {e}"),
                            });
                            Ok(Arc::new(CachedScan { scanned_at: stale.scanned_at, by_key: stale.by_key.clone(), report }))
                        } else {
                            Err(e)
                        }
                    }
                }
            }
        }
    }

    fn fresh_cached(&self) -> Option<Arc<CachedScan>> {
        let guard = self.cache.read();
        let cached = guard.as_ref()?;
        if cached.scanned_at.elapsed() < self.ttl {
            Some(cached.clone())
        } else {
            None
        }
    }

    async fn force_refresh(&self) -> Result<Arc<CachedScan>> {
        let (by_key, report) = self.full_scan().await?;
        let cached = Arc::new(CachedScan { scanned_at: Instant::now(), by_key, report });
        *self.cache.write() = Some(cached.clone());
        Ok(cached)
    }

    async fn full_scan(&self) -> Result<(HashMap<(String, String), Skill>, ScanReport)> {
        let start = Instant::now();
        let mut by_key: HashMap<(String, String), Skill> = HashMap::new();
        let mut errors = Vec::new();
        let warnings = Vec::new();
        let mut sources_scanned = 0usize;
        let mut sources_succeeded = 0usize;

        for space in &self.spaces {
            let namespace = Namespace::parse(&space.namespace).ok_or_else(|| SkillError::SpaceNotConfigured(space.namespace.clone()))?;
            for source_id in &space.source_ids {
                let Some(source) = self.sources.get(source_id) else {
                    errors.push(ScanIssue { source_id: source_id.clone(), message: "source not registered".to_string() });
                    continue;
                };
                sources_scanned += 1;
                let raw_skills = match source.scan().await {
                    Ok(skills) => {
                        sources_succeeded += 1;
                        skills
                    }
                    Err(e) => {
                        errors.push(ScanIssue { source_id: source_id.clone(), message: e.to_string() });
                        continue;
                    }
                };
                for raw in raw_skills {
                    let key = (space.namespace.clone(), raw.skill_name.clone());
                    if let Some(existing) = by_key.get(&key) {
                        return Err(SkillError::DuplicateSkillName {
                            namespace: space.namespace.clone(),
                            skill_name: raw.skill_name.clone(),
                            first_source: existing.source_id.clone(),
                            second_source: source.id().to_string(),
                        });
                    }
                    by_key.insert(
                        key,
                        Skill {
                            space_id: space.id.clone(),
                            source_id: source.id().to_string(),
                            namespace: namespace.clone(),
                            skill_name: raw.skill_name,
                            description: raw.description,
                            locator: raw.locator,
                            path: raw.path,
                            body_size: raw.body_size,
                            body_loader: raw.body_loader,
                            required_env_vars: raw.required_env_vars,
                            metadata: raw.metadata,
                            scope: raw.scope,
                        },
                    );
                }
            }
        }

        // A scan where every configured source errored is a failed refresh,
        // not an empty result.
        if sources_scanned > 0 && sources_succeeded == 0 {
            let detail = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");
            return Err(SkillError::ScanFailed(detail));
        }

        let stats = ScanStats { sources_scanned, skills_found: by_key.len(), duration_ms: start.elapsed().as_millis() as u64 };
        let report = ScanReport {
            scan_id: format!("scan-{}", chrono::Utc::now().timestamp_millis()),
            skills: by_key.values().map(ScannedSkillMeta::from).collect(),
            errors,
            warnings,
            stats,
        };
        Ok((by_key, report))
    }
}
