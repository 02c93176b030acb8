//! Fetch pipeline: download, schema-validate, parse and stamp definition
//! sources concurrently.
//!
//! One failing source never aborts the batch: its error becomes a
//! verification message and the source is absent from the result. Results
//! are reassembled in input order so downstream stages are deterministic.

use std::sync::Arc;

use defc_core::ports::{CompilerCallback, ContentService, FileDescriptor, SchemaRef, SchemaValidator};
use defc_core::source::{FilterDefinition, LabelDefinition, ParsedSource, SourceDocument};
use defc_core::{codes, Definition, VerificationMessage};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::TenantPolicy;
use crate::context::CompilerContext;
use crate::error::FetchError;

#[derive(Debug, Default)]
pub struct FetchResult {
    pub definitions: Vec<Definition>,
    pub labels: Vec<LabelDefinition>,
    pub filters: Vec<FilterDefinition>,
    pub messages: Vec<VerificationMessage>,
}

pub struct FetchPipeline {
    content: Arc<dyn ContentService>,
    validator: Arc<dyn SchemaValidator>,
    workers: usize,
    policy: TenantPolicy,
    default_container: Option<String>,
    update_identifiers: bool,
}

impl FetchPipeline {
    pub fn new(
        ctx: &CompilerContext,
        content: Arc<dyn ContentService>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        let config = ctx.config();
        Self {
            content,
            validator,
            workers: ctx.fetch_workers(),
            policy: config.tenant_policy,
            default_container: config.default_container.clone(),
            update_identifiers: config.update_identifiers,
        }
    }

    /// Fetch every accepted source on a bounded pool and collect the results.
    pub async fn load(
        &self,
        sources: Vec<FileDescriptor>,
        callback: Arc<dyn CompilerCallback>,
    ) -> FetchResult {
        let mut result = FetchResult::default();
        let schema = Arc::new(callback.schema());
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<(usize, FileDescriptor, Result<ParsedSource, FetchError>)> =
            JoinSet::new();

        let total = sources.len();
        for (index, file) in sources.into_iter().enumerate() {
            if !self
                .policy
                .accepts(file.container_id.as_deref(), self.default_container.as_deref())
            {
                debug!(source = %file.id, "source rejected by tenant policy");
                result.messages.push(
                    VerificationMessage::info(
                        codes::F_SOURCE_REJECTED,
                        format!("Source {} skipped by tenant policy", file.id),
                    )
                    .with_source(Some(&file.content_location)),
                );
                continue;
            }

            let content = Arc::clone(&self.content);
            let validator = Arc::clone(&self.validator);
            let callback = Arc::clone(&callback);
            let schema = Arc::clone(&schema);
            let permits = Arc::clone(&permits);
            let update_identifiers = self.update_identifiers;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = fetch_one(
                    &file,
                    content.as_ref(),
                    validator.as_ref(),
                    &schema,
                    callback.as_ref(),
                    update_identifiers,
                )
                .await;
                (index, file, outcome)
            });
        }

        let mut completed = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => completed.push(entry),
                Err(e) => {
                    warn!("fetch task failed: {e}");
                    result.messages.push(VerificationMessage::error(
                        codes::F_DOWNLOAD_FAILED,
                        FetchError::Task(e.to_string()).to_string(),
                    ));
                }
            }
        }
        completed.sort_by_key(|(index, _, _)| *index);

        let mut loaded = 0usize;
        for (_, file, outcome) in completed {
            match outcome {
                Ok(parsed) => {
                    loaded += 1;
                    result.definitions.extend(parsed.definitions);
                    result.labels.extend(parsed.labels);
                    result.filters.extend(parsed.filters);
                }
                Err(e) => {
                    warn!(source = %file.id, "Failed to load definition: {e}");
                    result.messages.push(
                        VerificationMessage::error(e.code(), e.to_string())
                            .with_source(Some(&file.content_location)),
                    );
                }
            }
        }

        info!(
            "Loaded {} of {} {} definition files ({} definitions)",
            loaded,
            total,
            callback.callback_name(),
            result.definitions.len()
        );
        result
    }
}

/// Parse raw bytes into the intermediate document.
pub fn parse_source(raw: &[u8]) -> Result<SourceDocument, FetchError> {
    serde_yaml::from_slice(raw).map_err(|e| FetchError::Syntax(e.to_string()))
}

async fn fetch_one(
    file: &FileDescriptor,
    content: &dyn ContentService,
    validator: &dyn SchemaValidator,
    schema: &SchemaRef,
    callback: &dyn CompilerCallback,
    update_identifiers: bool,
) -> Result<ParsedSource, FetchError> {
    let raw = content.fetch(file).await.map_err(FetchError::Download)?;

    let violations = validator.validate(&raw, schema);
    if !violations.is_empty() {
        return Err(FetchError::Schema(violations));
    }

    let mut parsed = parse_source(&raw)?.into_parsed(callback.kind())?;
    for def in &mut parsed.definitions {
        def.dms_id = Some(file.id.clone());
        def.source_location = Some(file.content_location.clone());
        def.container = file.container_id.clone();
        if update_identifiers {
            let id = callback
                .extract_definition_id(def)
                .ok_or(FetchError::MissingIdentifier)?;
            def.identifier = id;
        } else if def.identifier.trim().is_empty() {
            return Err(FetchError::MissingIdentifier);
        }
    }
    for label in &mut parsed.labels {
        label.source.get_or_insert_with(|| file.id.clone());
    }
    Ok(parsed)
}
