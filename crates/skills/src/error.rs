use thiserror::Error;

/// Errors raised by skill scanning, mention resolution, injection, and
/// bundle extraction. Names line up with the event-visible
/// error codes (`SKILL_SPACE_NOT_CONFIGURED` etc.) so callers can map
/// one to the other without a lookup table.
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill space not configured: {0}")]
    SpaceNotConfigured(String),

    #[error("skill unknown: {namespace}.{skill_name}")]
    Unknown { namespace: String, skill_name: String },

    #[error("skill body too large: {actual} bytes exceeds {limit} byte budget")]
    BodyTooLarge { actual: u64, limit: u64 },

    #[error("bundle fingerprint mismatch: expected {expected}, got {actual}")]
    BundleFingerprintMismatch { expected: String, actual: String },

    #[error("unsafe bundle entry '{0}'")]
    UnsafeBundleEntry(String),

    #[error("bundle exceeds size budget: {0}")]
    BundleTooLarge(String),

    #[error("missing required environment variable '{0}'")]
    MissingEnvVar(String),

    #[error("duplicate skill name '{namespace}.{skill_name}' from sources '{first_source}' and '{second_source}'")]
    DuplicateSkillName { namespace: String, skill_name: String, first_source: String, second_source: String },

    #[error("skill source '{0}' has no bundle support")]
    NoBundleSupport(String),

    #[error("skill scan failed: {0}")]
    ScanFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, SkillError>;

impl From<SkillError> for sa_engine_domain::EngineError {
    fn from(e: SkillError) -> Self {
        sa_engine_domain::EngineError::Skill(e.to_string())
    }
}
