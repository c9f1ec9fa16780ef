//! Backend registry: resolves adapter singletons by identifier.
//!
//! Adapters are constructed once (reading credentials from the process
//! environment) and cached behind `Arc` for the registry's lifetime. Unusable
//! backends are silently excluded from availability filters rather than
//! failing the whole debate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;

use super::{AnthropicBackend, BackendError, GeminiBackend, ModelBackend, OpenAiBackend};

/// Identity summary for listing backends.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub id: String,
    pub display_name: String,
    pub model: String,
    pub available: bool,
}

pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
    roster: Vec<String>,
}

impl BackendRegistry {
    /// Empty registry with the given default roster order.
    pub fn new(roster: Vec<String>) -> Self {
        Self {
            backends: HashMap::new(),
            roster,
        }
    }

    /// Registry with all built-in adapters, credentials from the environment.
    pub fn from_env(config: &Config) -> Self {
        let mut registry = Self::new(config.roster.clone());
        registry.register(Arc::new(AnthropicBackend::from_env()));
        registry.register(Arc::new(OpenAiBackend::from_env()));
        registry.register(Arc::new(GeminiBackend::from_env()));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn ModelBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    /// Cached singleton adapter for `id`.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn ModelBackend>, BackendError> {
        self.backends
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend(id.to_string()))
    }

    /// All registered backends whose credentials are present.
    pub fn available_backends(&self) -> Vec<Arc<dyn ModelBackend>> {
        let mut available: Vec<_> = self
            .backends
            .values()
            .filter(|b| b.is_available())
            .cloned()
            .collect();
        available.sort_by(|a, b| a.id().cmp(b.id()));
        available
    }

    /// The configured roster, in order, filtered to available backends.
    ///
    /// Callers must treat a result with fewer than two entries as an
    /// infeasible debate.
    pub fn default_roster(&self) -> Vec<Arc<dyn ModelBackend>> {
        self.roster
            .iter()
            .filter_map(|id| self.backends.get(id))
            .filter(|b| b.is_available())
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<BackendInfo> {
        let mut list: Vec<_> = self
            .backends
            .values()
            .map(|backend| {
                let descriptor = backend.descriptor();
                BackendInfo {
                    id: descriptor.id.to_string(),
                    display_name: descriptor.display_name.to_string(),
                    model: descriptor.model.clone(),
                    available: backend.is_available(),
                }
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedBackend;

    fn registry_with(backends: Vec<ScriptedBackend>, roster: &[&str]) -> BackendRegistry {
        let mut registry = BackendRegistry::new(roster.iter().map(|s| s.to_string()).collect());
        for backend in backends {
            registry.register(Arc::new(backend));
        }
        registry
    }

    #[test]
    fn resolve_unknown_backend() {
        let registry = registry_with(vec![], &[]);
        assert!(matches!(
            registry.resolve("nope"),
            Err(BackendError::UnknownBackend(_))
        ));
    }

    #[test]
    fn resolve_returns_cached_instance() {
        let registry = registry_with(vec![ScriptedBackend::new("alpha")], &["alpha"]);
        let first = registry.resolve("alpha").unwrap();
        let second = registry.resolve("alpha").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn available_filters_unconfigured() {
        let registry = registry_with(
            vec![
                ScriptedBackend::new("alpha"),
                ScriptedBackend::new("beta").unavailable(),
            ],
            &["alpha", "beta"],
        );
        let available = registry.available_backends();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id(), "alpha");
    }

    #[test]
    fn default_roster_preserves_order_and_filters() {
        let registry = registry_with(
            vec![
                ScriptedBackend::new("alpha"),
                ScriptedBackend::new("beta"),
                ScriptedBackend::new("gamma").unavailable(),
            ],
            &["beta", "gamma", "alpha"],
        );
        let roster = registry.default_roster();
        let ids: Vec<_> = roster.iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, vec!["beta", "alpha"]);
    }
}
