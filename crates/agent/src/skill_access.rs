//! Adapts [`sa_engine_skills::SkillsManager`] to the tools crate's
//! [`SkillAccess`] seam, so `skill_ref_read`/`skill_exec` handlers can reach
//! a skill's body or bundle without depending on the skills crate
//! directly; tools see only the trait, never the manager.

use std::sync::Arc;

use sa_engine_domain::config::SkillsConfig;
use sa_engine_domain::{EngineError, Result};
use sa_engine_exec::{CommandRequest, Executor};
use sa_engine_skills::SkillsManager;
use sa_engine_tools::SkillAccess;

pub struct SkillAccessAdapter {
    skills: Arc<SkillsManager>,
    executor: Arc<dyn Executor>,
    bundle_exec_timeout_ms: u64,
    actions_enabled: bool,
    references_enabled: bool,
    reference_max_bytes: u64,
}

impl SkillAccessAdapter {
    pub fn new(
        skills: Arc<SkillsManager>,
        executor: Arc<dyn Executor>,
        bundle_exec_timeout_ms: u64,
        config: &SkillsConfig,
    ) -> Self {
        Self {
            skills,
            executor,
            bundle_exec_timeout_ms,
            actions_enabled: config.actions.enabled,
            references_enabled: config.references.enabled,
            reference_max_bytes: config.references.default_max_bytes,
        }
    }
}

#[async_trait::async_trait]
impl SkillAccess for SkillAccessAdapter {
    async fn read_body(&self, namespace: &str, skill_name: &str) -> Result<String> {
        if !self.references_enabled {
            return Err(EngineError::Disabled("skill references are disabled".into()));
        }
        let skill = self.skills.resolve_skill(namespace, skill_name).await?;
        let body = self.skills.read_body(&skill)?;
        if (body.len() as u64) > self.reference_max_bytes {
            return Err(EngineError::Skill(format!(
                "reference body is {} bytes, exceeds default_max_bytes {}",
                body.len(),
                self.reference_max_bytes
            )));
        }
        Ok(body)
    }

    async fn run_bundle_entry(&self, namespace: &str, skill_name: &str, entry: &str, args: &[String]) -> Result<String> {
        if !self.actions_enabled {
            return Err(EngineError::Disabled("skill actions are disabled".into()));
        }
        let skill = self.skills.resolve_skill(namespace, skill_name).await?;
        let bundle_dir = self.skills.extract_bundle_for(&skill).await?;
        let entry_path = bundle_dir.join("actions").join(entry);
        if !entry_path.is_file() {
            return Err(EngineError::Skill(format!("bundle entry 'actions/{entry}' not found for {namespace}.{skill_name}")));
        }
        let mut argv = vec![entry_path.display().to_string()];
        argv.extend(args.iter().cloned());
        let result = self.executor.run_command(CommandRequest::new(argv, self.bundle_exec_timeout_ms)).await;
        if result.ok {
            Ok(result.stdout)
        } else {
            Err(EngineError::Skill(format!("bundle entry '{entry}' exited non-zero: {}", result.stderr)))
        }
    }
}
