use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sa_engine_domain::{ToolCall, ToolResult, ToolSpec};

use crate::context::ExecutionContext;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
pub type Handler = Arc<dyn Fn(ToolCall, Arc<ExecutionContext>) -> HandlerFuture + Send + Sync>;

struct Entry {
    spec: ToolSpec,
    handler: Handler,
}

/// Name-keyed tool registry. Registration with `override=false` (the
/// default) rejects duplicate names.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Handler, allow_override: bool) -> Result<(), RegisterError> {
        if !allow_override && self.entries.contains_key(&spec.name) {
            return Err(RegisterError::Duplicate(spec.name));
        }
        self.entries.insert(spec.name.clone(), Entry { spec, handler });
        Ok(())
    }

    pub fn get_spec(&self, name: &str) -> Option<&ToolSpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    pub fn get_handler(&self, name: &str) -> Option<Handler> {
        self.entries.get(name).map(|e| e.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.entries.values().map(|e| &e.spec).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_engine_domain::Idempotency;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: "test".into(),
            parameters: serde_json::json!({}),
            requires_approval: false,
            idempotency: Idempotency::Safe,
        }
    }

    fn noop_handler() -> Handler {
        Arc::new(|_call: ToolCall, _ctx| {
            Box::pin(async move { ToolResult::from_payload(&sa_engine_domain::ToolResultPayload::ok("", 0)) })
        })
    }

    #[test]
    fn duplicate_registration_rejected_without_override() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("a"), noop_handler(), false).unwrap();
        let err = registry.register(spec("a"), noop_handler(), false).unwrap_err();
        assert!(matches!(err, RegisterError::Duplicate(_)));
    }

    #[test]
    fn override_allows_replacement() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("a"), noop_handler(), false).unwrap();
        registry.register(spec("a"), noop_handler(), true).unwrap();
        assert!(registry.contains("a"));
    }

    #[test]
    fn unregistered_name_has_no_handler() {
        let registry = ToolRegistry::new();
        assert!(registry.get_handler("missing").is_none());
    }
}
