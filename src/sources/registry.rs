use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::error::{AppError, Result};
use crate::sources::SourceAdapter;

/// Adapters keyed by `source()`. Constructed at startup and handed to the
/// pipeline; there is no global instance.
pub struct SourceRegistry {
    adapters: DashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { adapters: DashMap::new() })
    }

    /// Register an adapter. An existing entry under the same key is replaced,
    /// which keeps development reloads working.
    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) -> Result<()> {
        let key = adapter.source().trim().to_string();
        if key.is_empty() {
            return Err(AppError::EmptySourceKey);
        }
        let replaced = self.adapters.insert(key.clone(), adapter).is_some();
        info!(source = %key, replaced, "Registered source adapter");
        Ok(())
    }

    /// Look up an adapter. A missing key is an error naming every registered
    /// key so a misconfigured run fails immediately.
    pub fn get(&self, source: &str) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(source)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::UnknownSource {
                requested: source.to_string(),
                registered: self.keys(),
            })
    }

    /// All adapters, sorted by key.
    pub fn list(&self) -> Vec<Arc<dyn SourceAdapter>> {
        let mut entries: Vec<_> = self
            .adapters
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, a)| a).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn count(&self) -> usize {
        self.adapters.len()
    }
}
