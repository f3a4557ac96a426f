use std::collections::HashMap;

use crate::config::ContextRecoveryMode;
use crate::event::Event;
use crate::message::Message;

/// Implemented by the WAL emitter. Kept as a trait in `sa-engine-domain` (not
/// a concrete type) so `RunContext` doesn't create a dependency cycle with
/// `sa-engine-wal`, which itself depends on `sa-engine-domain` for `Event`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: Event) {
        (**self).emit(event)
    }
}

/// Where an environment variable's value came from, for `env_var_set`
/// events — values are never logged, only the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    ProcessEnv,
    Provided,
    Human,
}

impl EnvSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvSource::ProcessEnv => "process_env",
            EnvSource::Provided => "provided",
            EnvSource::Human => "human",
        }
    }
}

/// Resolves required env vars: process env first, then run-provided
/// overrides, then human-supplied values.
#[derive(Debug, Default, Clone)]
pub struct EnvStore {
    provided: HashMap<String, String>,
    human: HashMap<String, String>,
}

impl EnvStore {
    pub fn new(provided: HashMap<String, String>) -> Self {
        Self { provided, human: HashMap::new() }
    }

    pub fn set_human(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.human.insert(key.into(), value.into());
    }

    /// Resolve `key`, returning the value and where it came from.
    pub fn resolve(&self, key: &str) -> Option<(String, EnvSource)> {
        if let Ok(v) = std::env::var(key) {
            return Some((v, EnvSource::ProcessEnv));
        }
        if let Some(v) = self.provided.get(key) {
            return Some((v.clone(), EnvSource::Provided));
        }
        if let Some(v) = self.human.get(key) {
            return Some((v.clone(), EnvSource::Human));
        }
        None
    }

    /// All currently known values, for the Safety Gate's secret-value
    /// redaction pass. Values only — never logged directly.
    pub fn known_values(&self) -> Vec<String> {
        let mut values: Vec<String> = self.provided.values().cloned().collect();
        values.extend(self.human.values().cloned());
        values.retain(|v| v.len() >= 4);
        values
    }
}

/// Compaction bookkeeping retained for the life of a run.
#[derive(Debug, Default, Clone)]
pub struct CompactionState {
    pub compactions_performed: u32,
    pub artifacts: Vec<String>,
}

/// Owns the live history array, the WAL emitter, compaction state, the
/// effective context-recovery mode, env store, and redaction values for
/// one run. Modeled as an arena: every per-run object is allocated here
/// and referenced by handle, never by back-reference.
pub struct RunContext<S: EventSink> {
    pub run_id: String,
    pub history: Vec<Message>,
    pub emitter: S,
    pub compaction: CompactionState,
    pub context_recovery_mode: ContextRecoveryMode,
    pub env_store: EnvStore,
}

impl<S: EventSink> RunContext<S> {
    pub fn new(run_id: impl Into<String>, emitter: S, context_recovery_mode: ContextRecoveryMode) -> Self {
        Self {
            run_id: run_id.into(),
            history: Vec::new(),
            emitter,
            compaction: CompactionState::default(),
            context_recovery_mode,
            env_store: EnvStore::default(),
        }
    }

    pub fn emit(&self, event: Event) {
        self.emitter.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingSink(Arc<Mutex<Vec<Event>>>);
    impl EventSink for RecordingSink {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn env_store_resolves_provided_before_human() {
        let mut provided = HashMap::new();
        provided.insert("FOO".to_string(), "from_provided".to_string());
        let mut store = EnvStore::new(provided);
        store.set_human("FOO", "from_human");
        let (value, source) = store.resolve("FOO").unwrap();
        assert_eq!(value, "from_provided");
        assert_eq!(source, EnvSource::Provided);
    }

    #[test]
    fn env_store_missing_returns_none() {
        let store = EnvStore::default();
        assert!(store.resolve("NOPE_NOT_SET_XYZ").is_none());
    }

    #[test]
    fn run_context_emits_through_sink() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let ctx = RunContext::new("r1", RecordingSink(buf.clone()), ContextRecoveryMode::CompactFirst);
        ctx.emit(Event::new(
            "r1",
            crate::event::EventKind::RunCancelled(crate::event::RunCancelledPayload {
                message: "x".into(),
                wal_locator: "y".into(),
            }),
        ));
        assert_eq!(buf.lock().unwrap().len(), 1);
    }
}
