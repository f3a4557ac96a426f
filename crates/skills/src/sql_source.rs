//! Postgres-shaped skill source: a single table with columns
//! `{id, namespace, skill_name, description, body, enabled, body_size,
//! body_etag, created_at, updated_at, required_env_vars, metadata, scope}`.
//! No postgres driver exists in this codebase's dependency tree, so this
//! is written against `SqlClient`, a narrow port exposing just the two
//! queries a scan and a lazy body fetch need.

use std::sync::Arc;

use crate::bridge::block_on_body;
use crate::error::Result;
use crate::source::{RawSkill, SkillSource};

/// One row from the metadata-only `SELECT` (scan never touches `body`).
#[derive(Debug, Clone)]
pub struct SqlSkillRow {
    pub id: String,
    pub skill_name: String,
    pub description: String,
    pub enabled: bool,
    pub body_size: Option<u64>,
    pub required_env_vars: Vec<String>,
    pub metadata: serde_json::Value,
    pub scope: Option<String>,
}

#[async_trait::async_trait]
pub trait SqlClient: Send + Sync {
    async fn query_metadata_rows(&self) -> std::io::Result<Vec<SqlSkillRow>>;
    async fn fetch_body(&self, id: &str) -> std::io::Result<Option<String>>;
}

pub struct PgsqlSource<C: SqlClient> {
    id: String,
    client: Arc<C>,
}

impl<C: SqlClient> PgsqlSource<C> {
    pub fn new(id: impl Into<String>, client: Arc<C>) -> Self {
        Self { id: id.into(), client }
    }
}

#[async_trait::async_trait]
impl<C: SqlClient + 'static> SkillSource for PgsqlSource<C> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn scan(&self) -> Result<Vec<RawSkill>> {
        let rows = self.client.query_metadata_rows().await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.enabled)
            .map(|row| {
                let client = self.client.clone();
                let row_id = row.id.clone();
                RawSkill {
                    skill_name: row.skill_name,
                    description: row.description,
                    locator: format!("pgsql:{}", row.id),
                    path: None,
                    body_size: row.body_size,
                    body_loader: Arc::new(move || {
                        let client = client.clone();
                        let row_id = row_id.clone();
                        block_on_body(move || async move {
                            client
                                .fetch_body(&row_id)
                                .await?
                                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "skill body not found"))
                        })
                    }),
                    required_env_vars: row.required_env_vars,
                    metadata: row.metadata,
                    scope: row.scope,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSql {
        rows: Vec<SqlSkillRow>,
        bodies: std::collections::HashMap<String, String>,
    }

    #[async_trait::async_trait]
    impl SqlClient for FakeSql {
        async fn query_metadata_rows(&self) -> std::io::Result<Vec<SqlSkillRow>> {
            Ok(self.rows.clone())
        }
        async fn fetch_body(&self, id: &str) -> std::io::Result<Option<String>> {
            Ok(self.bodies.get(id).cloned())
        }
    }

    fn fake_client() -> Arc<FakeSql> {
        Arc::new(FakeSql {
            rows: vec![
                SqlSkillRow {
                    id: "1".into(),
                    skill_name: "enabled-skill".into(),
                    description: "d".into(),
                    enabled: true,
                    body_size: Some(4),
                    required_env_vars: vec![],
                    metadata: serde_json::json!({}),
                    scope: None,
                },
                SqlSkillRow {
                    id: "2".into(),
                    skill_name: "disabled-skill".into(),
                    description: "d".into(),
                    enabled: false,
                    body_size: None,
                    required_env_vars: vec![],
                    metadata: serde_json::json!({}),
                    scope: None,
                },
            ],
            bodies: [("1".to_string(), "body-one".to_string())].into_iter().collect(),
        })
    }

    #[tokio::test]
    async fn scan_filters_out_disabled_rows() {
        let source = PgsqlSource::new("pg1", fake_client());
        let skills = source.scan().await.unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].skill_name, "enabled-skill");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn body_loader_fetches_by_row_id() {
        let source = PgsqlSource::new("pg1", fake_client());
        let skills = source.scan().await.unwrap();
        assert_eq!((skills[0].body_loader)().unwrap(), "body-one");
    }
}
