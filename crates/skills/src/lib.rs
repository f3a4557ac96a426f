//! Skills Manager: scans polymorphic sources (filesystem, in-memory, redis,
//! pgsql) into namespaced `Skill`s, resolves `$[ns].name` mentions, injects
//! bodies into prompts under a byte budget, and extracts zip bundles for
//! non-filesystem sources.

pub mod bridge;
pub mod bundle;
pub mod error;
pub mod kv_source;
pub mod manager;
pub mod source;
pub mod sql_source;

pub use bundle::{extract_bundle, BundleLimits};
pub use error::{Result, SkillError};
pub use kv_source::{KvScanClient, RedisSource};
pub use manager::{EnvVarOutcome, SkillsManager};
pub use source::{no_bundle_support, FetchedBundle, FilesystemSource, InMemorySkill, InMemorySource, RawSkill, SkillSource};
pub use sql_source::{PgsqlSource, SqlClient, SqlSkillRow};
