//! Name -> source lookup

use std::collections::BTreeMap;
use std::sync::Arc;

use super::source::SourceDefinition;

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<SourceDefinition>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source, replacing any previous one with the same name.
    pub fn register(&mut self, source: SourceDefinition) -> &mut Self {
        self.sources.insert(source.name.clone(), Arc::new(source));
        self
    }

    pub fn with(mut self, source: SourceDefinition) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<SourceDefinition>> {
        self.sources.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDefinition> {
        self.sources.values().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
