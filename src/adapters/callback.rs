//! Standard per-kind callback backed by an `InMemoryDictionary`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use defc_core::ports::{CompilerCallback, DictionaryService, Result};
use defc_core::{Definition, DefinitionKind};
use tracing::debug;

use super::memory::InMemoryDictionary;

pub struct StandardCallback {
    kind: DefinitionKind,
    name: String,
    dictionary: Arc<InMemoryDictionary>,
    live_instances: HashSet<String>,
}

impl StandardCallback {
    pub fn new(kind: DefinitionKind, dictionary: Arc<InMemoryDictionary>) -> Self {
        Self {
            kind,
            name: format!("{kind}"),
            dictionary,
            live_instances: HashSet::new(),
        }
    }

    /// Mark a definition key as instantiated so it is never a removal candidate.
    pub fn with_live_instance(mut self, key: impl Into<String>) -> Self {
        self.live_instances.insert(key.into());
        self
    }
}

#[async_trait]
impl CompilerCallback for StandardCallback {
    fn kind(&self) -> DefinitionKind {
        self.kind
    }

    fn callback_name(&self) -> &str {
        &self.name
    }

    async fn find_template_in_system(&self, def: &Definition) -> Result<Option<Definition>> {
        self.dictionary
            .find_persisted(&def.identifier, def.container.as_deref())
            .await
    }

    async fn save_template(&self, def: &Definition) -> Result<()> {
        debug!(definition = %def.key(), revision = def.revision, "saving definition");
        self.dictionary.store(def.clone()).await;
        Ok(())
    }

    async fn save_template_properties(&self, def: &Definition, _existing: Option<&Definition>) -> Result<()> {
        self.dictionary
            .save_properties(&def.key(), def.all_fields().cloned().collect())
            .await;
        Ok(())
    }

    async fn persisted_identifiers(&self) -> Result<Vec<String>> {
        Ok(self.dictionary.keys(self.kind).await)
    }

    async fn has_live_instances(&self, key: &str) -> Result<bool> {
        Ok(self.live_instances.contains(key))
    }
}
