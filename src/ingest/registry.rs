// src/ingest/registry.rs
//! Source registry: identifier -> source, kept in registration order so run
//! reports list sources reproducibly.

use std::sync::Arc;

use crate::ingest::error::DuplicateSourceError;
use crate::ingest::types::{NewsSource, Source};

#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled source whose display name is its identifier.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        capability: Arc<dyn NewsSource>,
    ) -> Result<(), DuplicateSourceError> {
        self.register_source(Source::new(id, capability))
    }

    pub fn register_source(&mut self, source: Source) -> Result<(), DuplicateSourceError> {
        if self.get(&source.id).is_some() {
            return Err(DuplicateSourceError(source.id));
        }
        tracing::debug!(target: "ingest", source = %source.id, enabled = source.enabled, "source registered");
        self.sources.push(Arc::new(source));
        Ok(())
    }

    /// Returns false when `id` is unknown.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.sources.iter_mut().find(|s| s.id == id) {
            Some(slot) => {
                let mut updated = (**slot).clone();
                updated.enabled = enabled;
                *slot = Arc::new(updated);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Source>> {
        self.sources.iter().find(|s| s.id == id).cloned()
    }

    pub fn enabled_sources(&self) -> Vec<Arc<Source>> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
