//! Compilation bookkeeping for one container: what is pending, compiled,
//! failed or unresolved. Definitions are processed parent-first; a failed
//! ancestor on either axis excludes the whole subtree.

use std::collections::HashSet;

use defc_core::ports::{CompilerCallback, DefinitionResolver};
use defc_core::{codes, Definition, MessageLog, UnresolvedReason, VerificationMessage};
use indexmap::IndexMap;
use tracing::{debug, trace};

use super::strategy::CompileStrategy;

pub(crate) struct CompilationHolder {
    pending: IndexMap<String, Definition>,
    compiled: IndexMap<String, Definition>,
    errors: HashSet<String>,
    unresolved: IndexMap<String, UnresolvedReason>,
}

impl CompilationHolder {
    pub fn new(sorted: IndexMap<String, Definition>, unresolved: IndexMap<String, UnresolvedReason>) -> Self {
        Self {
            pending: sorted,
            compiled: IndexMap::new(),
            errors: HashSet::new(),
            unresolved,
        }
    }

    /// Exclude a definition before the full compile (failed dry run).
    pub fn mark_failed(&mut self, key: &str) {
        self.pending.shift_remove(key);
        self.errors.insert(key.to_string());
    }

    pub fn is_failed(&self, key: &str) -> bool {
        self.errors.contains(key) || self.unresolved.contains_key(key)
    }

    /// Merge every pending definition with its parent, in sorted order.
    pub fn compile_all(
        &mut self,
        strategy: &dyn CompileStrategy,
        callback: &dyn CompilerCallback,
        log: &mut MessageLog,
    ) {
        let keys: Vec<String> = self.pending.keys().cloned().collect();
        for key in keys {
            self.process(&key, strategy, callback, log);
        }
    }

    fn process(
        &mut self,
        key: &str,
        strategy: &dyn CompileStrategy,
        callback: &dyn CompilerCallback,
        log: &mut MessageLog,
    ) {
        let Some(mut def) = self.pending.shift_remove(key) else {
            return;
        };

        // ancestors on either axis first, whatever order the sort produced
        for ancestor in [def.parent_key(), def.reference_key()].into_iter().flatten() {
            if self.pending.contains_key(&ancestor) {
                self.process(&ancestor, strategy, callback, log);
            }
            if self.is_failed(&ancestor) {
                debug!(definition = %key, ancestor = %ancestor, "skipping definition with failed ancestor");
                log.push(
                    VerificationMessage::error(
                        codes::C_REF_PARENT_FAILED,
                        format!(
                            "Definition {} is skipped because {} could not be compiled",
                            def.identifier, ancestor
                        ),
                    )
                    .with_definition(key)
                    .with_source(def.provenance()),
                );
                self.errors.insert(key.to_string());
                return;
            }
        }

        if let Some(parent_key) = def.parent_key() {
            if let Some(parent) = self.compiled.get(&parent_key) {
                trace!(definition = %key, before = ?def, "merging with parent {parent_key}");
                strategy.merge_parent(&mut def, parent);
                trace!(definition = %key, after = ?def, "merged");
            }
        }

        let before = log.error_count();
        if !callback.update_references(&mut def, &*self, log) {
            if log.error_count() == before {
                log.push(
                    VerificationMessage::error(
                        codes::C_REF_RESOLUTION_FAILED,
                        format!("Failed to update references of {}", def.identifier),
                    )
                    .with_definition(key),
                );
            }
            self.errors.insert(key.to_string());
            return;
        }

        self.compiled.insert(key.to_string(), def);
    }

    pub fn into_compiled(self) -> IndexMap<String, Definition> {
        self.compiled
    }
}

impl DefinitionResolver for CompilationHolder {
    fn resolve(&self, key: &str) -> Option<&Definition> {
        self.compiled.get(key)
    }
}
