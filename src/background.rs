//! Background saves of labels and filters collected during fetch.
//!
//! The compile run does not wait for these; `BackgroundTasks::join` lets a
//! caller (tests, the CLI) await them deterministically.

use std::sync::Arc;

use defc_core::ports::{AuxiliaryStore, CompilerCallback};
use defc_core::source::{FilterDefinition, LabelDefinition};
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn none() -> Self {
        Self::default()
    }

    /// Spawn one task per artifact kind that has something to save.
    pub fn spawn_saves(
        store: Arc<dyn AuxiliaryStore>,
        callback: Arc<dyn CompilerCallback>,
        labels: Vec<LabelDefinition>,
        filters: Vec<FilterDefinition>,
    ) -> Self {
        let mut tasks = Self::none();
        if !labels.is_empty() {
            let store = Arc::clone(&store);
            tasks.handles.push((
                "labels",
                tokio::spawn(async move { save_labels(store.as_ref(), callback.as_ref(), labels).await }),
            ));
        }
        if !filters.is_empty() {
            tasks.handles.push((
                "filters",
                tokio::spawn(async move { save_filters(store.as_ref(), filters).await }),
            ));
        }
        tasks
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every background save to finish.
    pub async fn join(self) {
        let names: Vec<&'static str> = self.handles.iter().map(|(n, _)| *n).collect();
        let results = futures::future::join_all(self.handles.into_iter().map(|(_, h)| h)).await;
        for (name, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                error!("background {name} save task failed: {e}");
            }
        }
    }
}

/// Labels without an id are skipped, duplicates keep the last one, invalid
/// labels are dropped; a failed write is logged only.
pub async fn save_labels(
    store: &dyn AuxiliaryStore,
    callback: &dyn CompilerCallback,
    labels: Vec<LabelDefinition>,
) {
    let mut unique: IndexMap<String, LabelDefinition> = IndexMap::new();
    for label in labels {
        if label.identifier.trim().is_empty() {
            warn!(source = ?label.source, "Label without identifier, skipping it");
            continue;
        }
        if !callback.validate_label(&label) {
            warn!(label = %label.identifier, "Invalid label, skipping it");
            continue;
        }
        if let Some(previous) = unique.insert(label.identifier.clone(), label) {
            warn!(
                label = %previous.identifier,
                source = ?previous.source,
                "Duplicate label, the later definition overrides it"
            );
        }
    }
    let count = unique.len();
    match store.save_labels(unique.into_values().collect()).await {
        Ok(()) => debug!("Saved {count} labels"),
        Err(e) => error!("Failed to save labels: {e}"),
    }
}

pub async fn save_filters(store: &dyn AuxiliaryStore, filters: Vec<FilterDefinition>) {
    let filters: Vec<FilterDefinition> = filters
        .into_iter()
        .filter(|f| {
            let keep = !f.identifier.trim().is_empty();
            if !keep {
                warn!("Filter without identifier, skipping it");
            }
            keep
        })
        .collect();
    let count = filters.len();
    match store.save_filters(filters).await {
        Ok(()) => debug!("Saved {count} filters"),
        Err(e) => error!("Failed to save filters: {e}"),
    }
}
