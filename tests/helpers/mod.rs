//! Shared harness for compiler integration tests.
//!
//! Everything runs against the in-memory adapters; sources are registered as
//! YAML strings.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use defc::adapters::{InMemoryDictionary, InMemorySources, InMemoryStore, StandardCallback, StructuralSchemaValidator};
use defc::{CompileError, CompileOutcome, CompilerConfig, CompilerContext, DefinitionCompiler};
use defc_core::ports::{CompilerCallback, ContentService, FileDescriptor, Result as PortResult};
use defc_core::{Definition, DefinitionKind, PortError};
use tokio::sync::Semaphore;

pub struct Harness {
    pub ctx: Arc<CompilerContext>,
    pub sources: Arc<InMemorySources>,
    pub dictionary: Arc<InMemoryDictionary>,
    pub store: Arc<InMemoryStore>,
    pub compiler: Arc<DefinitionCompiler>,
}

pub fn test_config() -> CompilerConfig {
    CompilerConfig {
        fetch_workers: 2,
        compile_workers: 2,
        ..CompilerConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        let sources = Arc::new(InMemorySources::new());
        Self::build(config, Arc::clone(&sources), sources)
    }

    /// Harness whose content fetches wait on `gate` permits.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        let sources = Arc::new(InMemorySources::new());
        let content = Arc::new(GatedContent {
            inner: Arc::clone(&sources),
            gate,
        });
        Self::build(test_config(), sources, content)
    }

    fn build(config: CompilerConfig, sources: Arc<InMemorySources>, content: Arc<dyn ContentService>) -> Self {
        let ctx = Arc::new(CompilerContext::new(config));
        let dictionary = Arc::new(InMemoryDictionary::new());
        let store = Arc::new(InMemoryStore::new());
        let compiler = Arc::new(DefinitionCompiler::new(
            Arc::clone(&ctx),
            sources.clone(),
            content,
            Arc::new(StructuralSchemaValidator::new()),
            dictionary.clone(),
            store.clone(),
        ));
        Self {
            ctx,
            sources,
            dictionary,
            store,
            compiler,
        }
    }

    pub async fn add(&self, kind: DefinitionKind, location: &str, container: Option<&str>, yaml: &str) {
        self.sources.add(kind, location, container, yaml).await;
    }

    pub fn callback(&self, kind: DefinitionKind) -> Arc<StandardCallback> {
        Arc::new(StandardCallback::new(kind, Arc::clone(&self.dictionary)))
    }

    pub async fn compile(&self, kind: DefinitionKind, persist: bool) -> std::result::Result<CompileOutcome, CompileError> {
        self.compiler
            .compile_kind(None, self.callback(kind), persist)
            .await
    }

    pub async fn compile_with(
        &self,
        callback: Arc<dyn CompilerCallback>,
        persist: bool,
    ) -> std::result::Result<CompileOutcome, CompileError> {
        self.compiler.compile_kind(None, callback, persist).await
    }
}

/// Codes of every message in the outcome, in order.
pub fn message_codes(outcome: &CompileOutcome) -> Vec<&str> {
    outcome.messages.iter().map(|m| m.code.as_str()).collect()
}

/// Keys of compiled definitions, in output order.
pub fn keys(outcome: &CompileOutcome) -> Vec<String> {
    outcome.definitions.iter().map(Definition::key).collect()
}

pub fn field_ids(def: &Definition) -> Vec<&str> {
    def.fields.iter().map(|f| f.identifier.as_str()).collect()
}

// ── Test doubles ──────────────────────────────────────────────

struct GatedContent {
    inner: Arc<InMemorySources>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ContentService for GatedContent {
    async fn fetch(&self, file: &FileDescriptor) -> PortResult<Vec<u8>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        self.inner.fetch(file).await
    }
}

/// Standard callback whose writes fail for selected keys.
pub struct FailingWrites {
    pub inner: StandardCallback,
    pub fail_on: HashSet<String>,
}

impl FailingWrites {
    pub fn new(inner: StandardCallback, fail_on: &[&str]) -> Self {
        Self {
            inner,
            fail_on: fail_on.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
impl CompilerCallback for FailingWrites {
    fn kind(&self) -> DefinitionKind {
        self.inner.kind()
    }

    fn callback_name(&self) -> &str {
        self.inner.callback_name()
    }

    async fn find_template_in_system(&self, def: &Definition) -> PortResult<Option<Definition>> {
        self.inner.find_template_in_system(def).await
    }

    async fn save_template(&self, def: &Definition) -> PortResult<()> {
        if self.fail_on.contains(&def.key()) {
            return Err(PortError::Unavailable(format!("store rejected {}", def.key())));
        }
        self.inner.save_template(def).await
    }

    async fn save_template_properties(&self, def: &Definition, existing: Option<&Definition>) -> PortResult<()> {
        self.inner.save_template_properties(def, existing).await
    }

    async fn warm_up_cache(&self) -> PortResult<()> {
        Err(PortError::Unavailable("cache offline".into()))
    }
}
