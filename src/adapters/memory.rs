//! In-memory port implementations.
//!
//! Used by tests and by the CLI, which snapshots the dictionary to a JSON
//! file between runs.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use defc_core::ports::{
    AuxiliaryStore, ContentService, DataTypeLookup, DictionaryService, FileDescriptor, Result,
    SourceProvider,
};
use defc_core::source::{FilterDefinition, LabelDefinition};
use defc_core::{definition_key, DataTypeDefinition, Definition, DefinitionKind, PortError, PropertyDefinition};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Built-in data types every dictionary starts with.
pub const STANDARD_TYPES: &[&str] = &[
    "text", "int", "long", "float", "double", "date", "datetime", "time", "boolean", "uri",
    "instance", "any",
];

// ── Dictionary ────────────────────────────────────────────────

/// Persisted definitions plus the data type registry.
#[derive(Debug, Default)]
pub struct InMemoryDictionary {
    types: HashMap<String, DataTypeDefinition>,
    persisted: RwLock<IndexMap<String, Definition>>,
    properties: RwLock<BTreeMap<String, Vec<PropertyDefinition>>>,
}

/// On-disk layout of a dictionary snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Snapshot {
    definitions: Vec<Definition>,
}

impl InMemoryDictionary {
    pub fn new() -> Self {
        Self::with_types(STANDARD_TYPES.iter().map(|name| DataTypeDefinition::named(*name)))
    }

    pub fn with_types(types: impl IntoIterator<Item = DataTypeDefinition>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.name.clone(), t)).collect(),
            ..Default::default()
        }
    }

    /// Store (or replace) a definition under its key.
    pub async fn store(&self, def: Definition) {
        self.persisted.write().await.insert(def.key(), def);
    }

    pub async fn get(&self, key: &str) -> Option<Definition> {
        self.persisted.read().await.get(key).cloned()
    }

    pub async fn keys(&self, kind: DefinitionKind) -> Vec<String> {
        self.persisted
            .read()
            .await
            .iter()
            .filter(|(_, d)| d.kind == kind)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.persisted.read().await.len()
    }

    pub async fn save_properties(&self, key: &str, fields: Vec<PropertyDefinition>) {
        self.properties.write().await.insert(key.to_string(), fields);
    }

    pub async fn properties(&self, key: &str) -> Option<Vec<PropertyDefinition>> {
        self.properties.read().await.get(key).cloned()
    }

    /// Replace the persisted set with the contents of a JSON snapshot.
    /// A missing file leaves the dictionary empty.
    pub async fn load_json(&self, path: &Path) -> anyhow::Result<()> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!("No dictionary snapshot at {}", path.display());
            return Ok(());
        }
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let mut persisted = self.persisted.write().await;
        persisted.clear();
        for def in snapshot.definitions {
            persisted.insert(def.key(), def);
        }
        info!("Loaded {} persisted definitions from {}", persisted.len(), path.display());
        Ok(())
    }

    pub async fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let snapshot = Snapshot {
            definitions: self.persisted.read().await.values().cloned().collect(),
        };
        let raw = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

impl DataTypeLookup for InMemoryDictionary {
    fn data_type(&self, name: &str) -> Option<DataTypeDefinition> {
        self.types.get(name).cloned()
    }
}

#[async_trait]
impl DictionaryService for InMemoryDictionary {
    async fn find_persisted(&self, identifier: &str, container: Option<&str>) -> Result<Option<Definition>> {
        Ok(self.get(&definition_key(identifier, container)).await)
    }
}

// ── Auxiliary store ───────────────────────────────────────────

/// Records saved labels and filters.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    labels: RwLock<Vec<LabelDefinition>>,
    filters: RwLock<Vec<FilterDefinition>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn labels(&self) -> Vec<LabelDefinition> {
        self.labels.read().await.clone()
    }

    pub async fn filters(&self) -> Vec<FilterDefinition> {
        self.filters.read().await.clone()
    }
}

#[async_trait]
impl AuxiliaryStore for InMemoryStore {
    async fn save_labels(&self, labels: Vec<LabelDefinition>) -> Result<()> {
        self.labels.write().await.extend(labels);
        Ok(())
    }

    async fn save_filters(&self, filters: Vec<FilterDefinition>) -> Result<()> {
        self.filters.write().await.extend(filters);
        Ok(())
    }
}

// ── Sources ───────────────────────────────────────────────────

/// Source listing and content served from memory.
#[derive(Debug, Default)]
pub struct InMemorySources {
    files: RwLock<IndexMap<String, (DefinitionKind, FileDescriptor, Vec<u8>)>>,
}

impl InMemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. `location` doubles as the file id.
    pub async fn add(
        &self,
        kind: DefinitionKind,
        location: &str,
        container: Option<&str>,
        content: impl Into<Vec<u8>>,
    ) -> FileDescriptor {
        let file = FileDescriptor::new(location, container, location);
        self.files
            .write()
            .await
            .insert(location.to_string(), (kind, file.clone(), content.into()));
        file
    }

    pub async fn remove(&self, location: &str) {
        self.files.write().await.shift_remove(location);
    }
}

#[async_trait]
impl SourceProvider for InMemorySources {
    async fn sources(&self, kind: DefinitionKind) -> Result<Vec<FileDescriptor>> {
        Ok(self
            .files
            .read()
            .await
            .values()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, file, _)| file.clone())
            .collect())
    }
}

#[async_trait]
impl ContentService for InMemorySources {
    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>> {
        self.files
            .read()
            .await
            .get(&file.id)
            .map(|(_, _, content)| content.clone())
            .ok_or_else(|| PortError::NotFound(file.content_location.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dictionary_roundtrip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let dictionary = InMemoryDictionary::new();
        let mut def = Definition::new("case");
        def.container = Some("t1".into());
        def.revision = 3;
        dictionary.store(def).await;
        dictionary.save_json(&path).await.unwrap();

        let reloaded = InMemoryDictionary::new();
        reloaded.load_json(&path).await.unwrap();
        let found = reloaded.find_persisted("case", Some("t1")).await.unwrap().unwrap();
        assert_eq!(found.revision, 3);
        assert!(reloaded.data_type("datetime").is_some());
        assert!(reloaded.data_type("blob").is_none());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dictionary = InMemoryDictionary::new();
        dictionary.load_json(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(dictionary.len().await, 0);
    }

    #[tokio::test]
    async fn test_sources_filtered_by_kind() {
        let sources = InMemorySources::new();
        sources.add(DefinitionKind::Case, "a.yaml", Some("t1"), "definition: {id: a}").await;
        sources.add(DefinitionKind::Template, "t.yaml", None, "definitions: []").await;

        let cases = sources.sources(DefinitionKind::Case).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].container_id.as_deref(), Some("t1"));

        let missing = FileDescriptor::new("nope", None, "nope");
        assert!(matches!(sources.fetch(&missing).await, Err(PortError::NotFound(_))));
    }
}
