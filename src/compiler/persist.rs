//! Persist decision and writes for compiled definitions.

use defc_core::ports::{CompilerCallback, DictionaryService};
use defc_core::revision::{apply_revision, decide_with};
use defc_core::{codes, Definition, MessageLog, PortError, RevisionDecision, VerificationMessage};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::error::CompileError;

#[derive(Debug, Default)]
pub(crate) struct PersistOutcome {
    pub decisions: IndexMap<String, RevisionDecision>,
    pub skipped: Vec<String>,
    pub persisted: Vec<String>,
}

pub(crate) struct PersistStep<'a> {
    pub callback: &'a dyn CompilerCallback,
    pub dictionary: &'a dyn DictionaryService,
    /// `false` decides revisions without writing anything.
    pub write: bool,
}

impl PersistStep<'_> {
    /// Decide, stamp and (optionally) write every definition in order. The
    /// first failed lookup or write aborts the batch.
    pub async fn run(
        &self,
        definitions: &mut [Definition],
        log: &mut MessageLog,
    ) -> Result<PersistOutcome, CompileError> {
        let mut outcome = PersistOutcome::default();

        for def in definitions.iter_mut() {
            let key = def.key();
            let persistence = |source: PortError| CompileError::Persistence {
                definition: key.clone(),
                source,
            };

            let existing = self
                .callback
                .find_template_in_system(def)
                .await
                .map_err(persistence)?;
            let decision = decide_with(def, existing.as_ref(), |a, b| {
                self.dictionary.is_definition_equal(a, b)
            });

            match (decision, &existing) {
                (RevisionDecision::Skip, Some(existing)) => {
                    debug!(definition = %key, revision = existing.revision, "Definition not changed, skipping it");
                    apply_revision(def, existing.revision);
                    outcome.skipped.push(key.clone());
                }
                (RevisionDecision::Skip, None) => {}
                (RevisionDecision::PersistAsRevision(revision), _) => {
                    def.revision = revision;
                    self.callback.set_property_revision(def);
                    if let Some(existing) = &existing {
                        info!(
                            definition = %key,
                            "Definition changed, revision {} -> {}",
                            existing.revision,
                            revision
                        );
                        log.push(
                            VerificationMessage::info(
                                codes::P_REVISION_BUMPED,
                                format!(
                                    "Revision of {} advanced from {} to {revision}",
                                    def.identifier, existing.revision
                                ),
                            )
                            .with_definition(&key),
                        );
                    }
                    if self.write {
                        self.callback
                            .save_template_properties(def, existing.as_ref())
                            .await
                            .map_err(persistence)?;
                        self.callback.save_template(def).await.map_err(persistence)?;
                        outcome.persisted.push(key.clone());
                    }
                }
            }
            outcome.decisions.insert(key, decision);
        }

        Ok(outcome)
    }
}
