//! Redis-shaped skill source: meta hash at
//! `<prefix>meta:<namespace>:<skill_name>`, body at `<prefix>body:<…>`,
//! optional zip bundle at `<prefix>bundle:<…>`. No redis driver exists
//! anywhere in this codebase's dependency tree, so this is written against
//! `KvScanClient`, a narrow port capturing only the three primitives a scan
//! needs (`scan_keys`, `hgetall`, `get_bytes`) — any redis crate the host
//! application wires in just needs to implement it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::block_on_body;
use crate::error::Result;
use crate::source::{FetchedBundle, RawSkill, SkillSource};

#[async_trait::async_trait]
pub trait KvScanClient: Send + Sync {
    /// Keys matching a `prefix*` glob. Implementations own cursoring.
    async fn scan_keys(&self, pattern: &str) -> std::io::Result<Vec<String>>;
    async fn hgetall(&self, key: &str) -> std::io::Result<HashMap<String, String>>;
    async fn get_bytes(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
}

pub struct RedisSource<C: KvScanClient> {
    id: String,
    prefix: String,
    client: Arc<C>,
}

impl<C: KvScanClient> RedisSource<C> {
    pub fn new(id: impl Into<String>, prefix: impl Into<String>, client: Arc<C>) -> Self {
        Self { id: id.into(), prefix: prefix.into(), client }
    }

    fn body_key(&self, skill_name: &str) -> String {
        format!("{}body:{}", self.prefix, skill_name)
    }

    fn bundle_key(&self, skill_name: &str) -> String {
        format!("{}bundle:{}", self.prefix, skill_name)
    }
}

fn field(hash: &HashMap<String, String>, name: &str) -> String {
    hash.get(name).cloned().unwrap_or_default()
}

#[async_trait::async_trait]
impl<C: KvScanClient + 'static> SkillSource for RedisSource<C> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn scan(&self) -> Result<Vec<RawSkill>> {
        let pattern = format!("{}meta:*", self.prefix);
        let keys = self.client.scan_keys(&pattern).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let hash = self.client.hgetall(&key).await?;
            let skill_name = {
                let from_hash = field(&hash, "skill_name");
                if from_hash.is_empty() { key.rsplit(':').next().unwrap_or_default().to_string() } else { from_hash }
            };
            if skill_name.is_empty() {
                tracing::warn!(key = %key, "redis skill meta hash has no skill_name, skipping");
                continue;
            }
            let description = field(&hash, "description");
            let required_env_vars: Vec<String> =
                hash.get("required_env_vars").and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default();
            let metadata: serde_json::Value =
                hash.get("metadata").and_then(|s| serde_json::from_str(s).ok()).unwrap_or_else(|| serde_json::json!({}));
            let scope = hash.get("scope").cloned();
            let body_size = hash.get("body_size").and_then(|s| s.parse::<u64>().ok());

            let client = self.client.clone();
            let body_key = self.body_key(&skill_name);
            out.push(RawSkill {
                skill_name: skill_name.clone(),
                description,
                locator: key.clone(),
                path: None,
                body_size,
                body_loader: Arc::new(move || {
                    let client = client.clone();
                    let body_key = body_key.clone();
                    block_on_body(move || async move {
                        let bytes = client
                            .get_bytes(&body_key)
                            .await?
                            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "skill body not found"))?;
                        Ok(String::from_utf8_lossy(&bytes).into_owned())
                    })
                }),
                required_env_vars,
                metadata,
                scope,
            });
        }
        Ok(out)
    }

    async fn get_bundle(&self, skill_name: &str) -> Result<Option<FetchedBundle>> {
        let Some(bytes) = self.client.get_bytes(&self.bundle_key(skill_name)).await? else {
            return Ok(None);
        };
        // The meta hash key embeds a namespace segment this source does not
        // know, so find it by suffix among the scanned meta keys.
        let keys = self.client.scan_keys(&format!("{}meta:*", self.prefix)).await?;
        let suffix = format!(":{skill_name}");
        let mut declared_sha256 = String::new();
        if let Some(key) = keys.iter().find(|k| k.ends_with(&suffix)) {
            let meta = self.client.hgetall(key).await?;
            declared_sha256 = field(&meta, "bundle_sha256");
        }
        Ok(Some(FetchedBundle { bytes, declared_sha256 }))
    }
}
