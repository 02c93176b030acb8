//! Definition compiler: orchestrates a run from raw sources to compiled,
//! versioned definitions.
//!
//! Stages:
//!   Loaded → Grouped → Sorted → RootCompiled (dry run) → FullyCompiled → PersistDecided
//!
//! Fetching and cache warm-up run concurrently; per-container compile units
//! run on blocking threads bounded by `compile_workers`; persist decisions
//! are made sequentially in container order so output is deterministic.

mod grouping;
mod holder;
mod persist;
mod strategy;
mod unit;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use defc_core::ports::{
    AuxiliaryStore, CompilerCallback, ContentService, DictionaryService, FileDescriptor,
    SchemaValidator, SourceProvider,
};
use defc_core::{
    codes, Definition, DefinitionKind, MessageLog, RevisionDecision, UnresolvedReason,
    VerificationMessage,
};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::background::BackgroundTasks;
use crate::context::{CompilerContext, RunGuard};
use crate::error::CompileError;
use crate::fetch::FetchPipeline;

pub use grouping::{group_by_container, remove_duplicates, ContainerGroups};
pub use strategy::{strategy_for, CompileStrategy, TemplateStrategy, TopLevelStrategy};

use persist::PersistStep;
use unit::{CompileUnit, UnitEnv, UnitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStage {
    Loaded,
    Grouped,
    Sorted,
    RootCompiled,
    FullyCompiled,
    PersistDecided,
}

impl CompileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Grouped => "grouped",
            Self::Sorted => "sorted",
            Self::RootCompiled => "root_compiled",
            Self::FullyCompiled => "fully_compiled",
            Self::PersistDecided => "persist_decided",
        }
    }
}

impl std::fmt::Display for CompileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct CompileOutcome {
    pub run_id: Uuid,
    pub kind: DefinitionKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Compiled definitions, containers in sorted order, parents first.
    pub definitions: Vec<Definition>,
    pub decisions: IndexMap<String, RevisionDecision>,
    pub messages: Vec<VerificationMessage>,
    pub unresolved: IndexMap<String, UnresolvedReason>,
    pub skipped: Vec<String>,
    pub persisted: Vec<String>,
    /// Persisted keys not produced by this run and without live instances.
    pub removal_candidates: Vec<String>,
    /// Label/filter saves still running; `join().await` to wait for them.
    pub background: BackgroundTasks,
}

impl CompileOutcome {
    pub fn definition(&self, key: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.key() == key)
    }

    pub fn errors(&self) -> impl Iterator<Item = &VerificationMessage> {
        self.messages.iter().filter(|m| m.is_error())
    }

    pub fn report(&self) -> CompileReport {
        CompileReport {
            run_id: self.run_id,
            kind: self.kind,
            started_at: self.started_at,
            finished_at: self.finished_at,
            compiled: self
                .definitions
                .iter()
                .map(|d| {
                    let key = d.key();
                    CompiledEntry {
                        decision: self.decisions.get(&key).copied(),
                        revision: d.revision,
                        key,
                    }
                })
                .collect(),
            messages: self.messages.clone(),
            unresolved: self.unresolved.clone(),
            skipped: self.skipped.clone(),
            persisted: self.persisted.clone(),
            removal_candidates: self.removal_candidates.clone(),
        }
    }
}

/// Serializable summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    pub run_id: Uuid,
    pub kind: DefinitionKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub compiled: Vec<CompiledEntry>,
    pub messages: Vec<VerificationMessage>,
    pub unresolved: IndexMap<String, UnresolvedReason>,
    pub skipped: Vec<String>,
    pub persisted: Vec<String>,
    pub removal_candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompiledEntry {
    pub key: String,
    pub revision: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RevisionDecision>,
}

/// Compiler service. Holds its ports as `Arc<dyn Port>`; one instance can
/// serve every definition kind.
pub struct DefinitionCompiler {
    ctx: Arc<CompilerContext>,
    sources: Arc<dyn SourceProvider>,
    content: Arc<dyn ContentService>,
    validator: Arc<dyn SchemaValidator>,
    dictionary: Arc<dyn DictionaryService>,
    store: Arc<dyn AuxiliaryStore>,
}

impl DefinitionCompiler {
    pub fn new(
        ctx: Arc<CompilerContext>,
        sources: Arc<dyn SourceProvider>,
        content: Arc<dyn ContentService>,
        validator: Arc<dyn SchemaValidator>,
        dictionary: Arc<dyn DictionaryService>,
        store: Arc<dyn AuxiliaryStore>,
    ) -> Self {
        Self {
            ctx,
            sources,
            content,
            validator,
            dictionary,
            store,
        }
    }

    pub fn context(&self) -> &CompilerContext {
        &self.ctx
    }

    /// Compile an explicit source list under a fresh single-flight guard.
    pub async fn compile(
        &self,
        sources: Vec<FileDescriptor>,
        callback: Arc<dyn CompilerCallback>,
        persist: bool,
    ) -> Result<CompileOutcome, CompileError> {
        let guard = self.ctx.begin()?;
        self.run(&guard, sources, callback, persist).await
    }

    /// Compile every source the provider lists for the callback's kind.
    /// Pass the caller's guard to run inside an already-active run.
    pub async fn compile_kind(
        &self,
        guard: Option<&RunGuard>,
        callback: Arc<dyn CompilerCallback>,
        persist: bool,
    ) -> Result<CompileOutcome, CompileError> {
        let owned;
        let guard = match guard {
            Some(guard) => guard,
            None => {
                owned = self.ctx.begin()?;
                &owned
            }
        };
        let sources = self
            .sources
            .sources(callback.kind())
            .await
            .map_err(CompileError::Sources)?;
        self.run(guard, sources, callback, persist).await
    }

    /// Compile several kinds in order under one guard.
    pub async fn compile_all(
        &self,
        callbacks: &[Arc<dyn CompilerCallback>],
        persist: bool,
    ) -> Result<Vec<CompileOutcome>, CompileError> {
        let guard = self.ctx.begin()?;
        let mut outcomes = Vec::with_capacity(callbacks.len());
        for callback in callbacks {
            outcomes.push(
                self.compile_kind(Some(&guard), Arc::clone(callback), persist)
                    .await?,
            );
        }
        Ok(outcomes)
    }

    async fn run(
        &self,
        _guard: &RunGuard,
        sources: Vec<FileDescriptor>,
        callback: Arc<dyn CompilerCallback>,
        persist: bool,
    ) -> Result<CompileOutcome, CompileError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let kind = callback.kind();
        let strategy = strategy_for(kind);
        info!(
            %run_id,
            "Compiling {} {} sources ({} strategy, persist={})",
            sources.len(),
            callback.callback_name(),
            strategy.name(),
            persist
        );

        // ── Loaded ──
        let warm_up = {
            let callback = Arc::clone(&callback);
            tokio::spawn(async move { callback.warm_up_cache().await })
        };
        let fetched = FetchPipeline::new(&self.ctx, Arc::clone(&self.content), Arc::clone(&self.validator))
            .load(sources, Arc::clone(&callback))
            .await;

        let mut log = MessageLog::new();
        log.extend(fetched.messages);
        let warm_up_failure = match warm_up.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = warm_up_failure {
            warn!("Failed to wait for cache warm-up, continuing: {reason}");
            log.push(VerificationMessage::warning(
                codes::C_CACHE_WARM_UP_FAILED,
                format!("Cache warm-up failed: {reason}"),
            ));
        }

        let background = BackgroundTasks::spawn_saves(
            Arc::clone(&self.store),
            Arc::clone(&callback),
            fetched.labels,
            fetched.filters,
        );
        info!(%run_id, stage = %CompileStage::Loaded, definitions = fetched.definitions.len());

        // ── Grouped ──
        let unique = remove_duplicates(fetched.definitions, &mut log);
        let groups = group_by_container(
            unique,
            strategy.propagates_base(),
            &self.ctx.enabled_containers(),
            &mut log,
        );
        info!(%run_id, stage = %CompileStage::Grouped, containers = groups.len());

        // ── Sorted / RootCompiled / FullyCompiled, per container ──
        let env = UnitEnv {
            callback: Arc::clone(&callback),
            dictionary: Arc::clone(&self.dictionary),
            strategy,
            model_prefix: self.ctx.config().model_prefix.clone(),
        };
        let units = self.compile_units(groups, env).await?;

        let mut definitions = Vec::new();
        let mut unresolved = IndexMap::new();
        for unit in units {
            definitions.extend(unit.compiled);
            unresolved.extend(unit.unresolved);
            log.extend(unit.messages);
        }

        // ── PersistDecided ──
        let step = PersistStep {
            callback: callback.as_ref(),
            dictionary: self.dictionary.as_ref(),
            write: persist,
        };
        let persisted = step.run(&mut definitions, &mut log).await?;
        info!(
            %run_id,
            stage = %CompileStage::PersistDecided,
            "{} definitions compiled, {} unchanged, {} persisted",
            definitions.len(),
            persisted.skipped.len(),
            persisted.persisted.len()
        );

        let removal_candidates = removal_candidates(callback.as_ref(), &definitions, &mut log).await;

        Ok(CompileOutcome {
            run_id,
            kind,
            started_at,
            finished_at: Utc::now(),
            definitions,
            decisions: persisted.decisions,
            messages: log.into_vec(),
            unresolved,
            skipped: persisted.skipped,
            persisted: persisted.persisted,
            removal_candidates,
            background,
        })
    }

    /// Run one blocking compile unit per container, at most
    /// `compile_workers` at a time; results come back in container order.
    async fn compile_units(
        &self,
        groups: ContainerGroups,
        env: UnitEnv,
    ) -> Result<Vec<UnitOutcome>, CompileError> {
        let permits = Arc::new(Semaphore::new(self.ctx.compile_workers()));
        let mut tasks: JoinSet<(usize, UnitOutcome)> = JoinSet::new();
        let count = groups.len();

        for (index, (container, definitions)) in groups.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let env = env.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let unit = CompileUnit {
                    container: container.clone(),
                    definitions,
                };
                let outcome = tokio::task::spawn_blocking(move || unit.compile(&env))
                    .await
                    .map_err(|e| e.to_string());
                match outcome {
                    Ok(outcome) => (index, outcome),
                    Err(reason) => {
                        let mut failed = UnitOutcome {
                            container,
                            ..Default::default()
                        };
                        failed.messages.push(VerificationMessage::error(
                            codes::C_VALIDATE_FAILED,
                            format!("Compile unit panicked: {reason}"),
                        ));
                        (index, failed)
                    }
                }
            });
        }

        let mut outcomes: Vec<(usize, UnitOutcome)> = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.map_err(|e| CompileError::Task(e.to_string()))?);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }
}

/// Persisted definitions this run did not produce and nobody instantiates.
/// Lookup failures are reported, never fatal.
async fn removal_candidates(
    callback: &dyn CompilerCallback,
    compiled: &[Definition],
    log: &mut MessageLog,
) -> Vec<String> {
    let produced: HashSet<String> = compiled.iter().map(Definition::key).collect();
    let persisted = match callback.persisted_identifiers().await {
        Ok(keys) => keys,
        Err(e) => {
            log.push(VerificationMessage::warning(
                codes::P_GC_LOOKUP_FAILED,
                format!("Failed to list persisted definitions: {e}"),
            ));
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    for key in persisted.into_iter().filter(|k| !produced.contains(k)) {
        match callback.has_live_instances(&key).await {
            Ok(true) => {}
            Ok(false) => {
                log.push(
                    VerificationMessage::info(
                        codes::P_GC_CANDIDATE,
                        format!("Definition {key} is no longer declared and has no instances"),
                    )
                    .with_definition(&key),
                );
                candidates.push(key);
            }
            Err(e) => log.push(
                VerificationMessage::warning(
                    codes::P_GC_LOOKUP_FAILED,
                    format!("Failed to check instances of {key}: {e}"),
                )
                .with_definition(&key),
            ),
        }
    }
    candidates
}
