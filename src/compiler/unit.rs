//! One container's compile unit: normalize → dry-run roots → sort → merge →
//! validate. Runs synchronously on a blocking thread.

use std::sync::Arc;

use defc_core::normalize::NormalizeContext;
use defc_core::ports::{CompilerCallback, DataTypeLookup, DictionaryService};
use defc_core::{
    codes, sort_both_axes, DataTypeDefinition, Definition, MessageLog, UnresolvedReason,
    VerificationMessage,
};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::holder::CompilationHolder;
use super::strategy::CompileStrategy;
use super::CompileStage;

/// Minimum Jaro-Winkler similarity for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.85;

/// Shared, cheap-to-clone environment of every unit in a run.
#[derive(Clone)]
pub(crate) struct UnitEnv {
    pub callback: Arc<dyn CompilerCallback>,
    pub dictionary: Arc<dyn DictionaryService>,
    pub strategy: &'static dyn CompileStrategy,
    pub model_prefix: String,
}

pub(crate) struct CompileUnit {
    pub container: Option<String>,
    pub definitions: IndexMap<String, Definition>,
}

#[derive(Debug, Default)]
pub(crate) struct UnitOutcome {
    pub container: Option<String>,
    pub compiled: Vec<Definition>,
    pub unresolved: IndexMap<String, UnresolvedReason>,
    pub messages: Vec<VerificationMessage>,
}

struct DictionaryTypes<'a>(&'a dyn DictionaryService);

impl DataTypeLookup for DictionaryTypes<'_> {
    fn data_type(&self, name: &str) -> Option<DataTypeDefinition> {
        self.0.data_type(name)
    }
}

impl CompileUnit {
    pub fn compile(self, env: &UnitEnv) -> UnitOutcome {
        let container = self.container.clone();
        let label = container.as_deref().unwrap_or("<base>");
        let types = DictionaryTypes(env.dictionary.as_ref());
        let ctx = NormalizeContext {
            types: &types,
            model_prefix: &env.model_prefix,
        };
        let callback = env.callback.as_ref();
        let mut log = MessageLog::new();

        // ── Grouped: stamp paths and types so merge sees resolved fields ──
        let mut definitions = self.definitions;
        for def in definitions.values_mut() {
            callback.normalize_fields(def, &ctx, &mut MessageLog::new());
        }
        debug!(container = label, stage = %CompileStage::Grouped, count = definitions.len());

        // ── RootCompiled: dry run on copies ──
        let mut dry_run_failed: Vec<String> = Vec::new();
        for (key, def) in definitions.iter().filter(|(_, d)| d.parent_definition_id.is_none()) {
            let mut copy = def.clone();
            let mut scratch = MessageLog::new();
            if !finalize(&mut copy, callback, &ctx, &mut scratch) {
                warn!(definition = %key, "Root definition failed the dry run");
                log.extend(scratch.into_vec().into_iter().filter(VerificationMessage::is_error));
                log.push(
                    VerificationMessage::error(
                        codes::C_VALIDATE_DRY_RUN_FAILED,
                        format!("Found errors while compiling root definition {}. Skipping it!", def.identifier),
                    )
                    .with_definition(key)
                    .with_source(def.provenance()),
                );
                dry_run_failed.push(key.clone());
            }
        }
        debug!(container = label, stage = %CompileStage::RootCompiled, failed = dry_run_failed.len());

        // ── Sorted ──
        let unresolved = sort_both_axes(&mut definitions);
        for (key, reason) in &unresolved {
            log.push(unresolved_message(key, reason, &definitions));
        }
        debug!(container = label, stage = %CompileStage::Sorted, count = definitions.len());

        // ── FullyCompiled: merge ──
        let mut holder = CompilationHolder::new(definitions, unresolved.clone());
        for key in &dry_run_failed {
            holder.mark_failed(key);
        }
        holder.compile_all(env.strategy, callback, &mut log);
        let merged = holder.into_compiled();

        // ── normalize + validate; exclusion cascades to descendants ──
        let mut excluded: Vec<String> = dry_run_failed;
        let mut compiled = Vec::with_capacity(merged.len());
        for (key, mut def) in merged {
            let failed_ancestor = [def.parent_key(), def.reference_key()]
                .into_iter()
                .flatten()
                .find(|a| excluded.contains(a));
            if let Some(ancestor) = failed_ancestor {
                log.push(
                    VerificationMessage::error(
                        codes::C_REF_PARENT_FAILED,
                        format!(
                            "Definition {} is skipped because {} failed validation",
                            def.identifier, ancestor
                        ),
                    )
                    .with_definition(&key)
                    .with_source(def.provenance()),
                );
                excluded.push(key);
                continue;
            }
            if finalize(&mut def, callback, &ctx, &mut log) {
                compiled.push(def);
            } else {
                warn!(definition = %key, "Found errors while validating definition, skipping it");
                log.push(
                    VerificationMessage::error(
                        codes::C_VALIDATE_FAILED,
                        format!("Found errors while validating {}. Skipping it!", def.identifier),
                    )
                    .with_definition(&key)
                    .with_source(def.provenance()),
                );
                excluded.push(key);
            }
        }
        info!(
            container = label,
            stage = %CompileStage::FullyCompiled,
            "Compiled {} {} definitions ({} excluded, {} unresolved)",
            compiled.len(),
            callback.callback_name(),
            excluded.len(),
            unresolved.len()
        );

        UnitOutcome {
            container,
            compiled,
            unresolved,
            messages: log.into_vec(),
        }
    }
}

/// normalize → prepare-for-persist → validate. `false` if any error was logged.
fn finalize(
    def: &mut Definition,
    callback: &dyn CompilerCallback,
    ctx: &NormalizeContext<'_>,
    log: &mut MessageLog,
) -> bool {
    let before = log.error_count();
    callback.normalize_fields(def, ctx, log);
    callback.prepare_for_persist(def, ctx, log);
    let valid = callback.validate_compiled_definition(def, log);
    valid && log.error_count() == before
}

fn unresolved_message(
    key: &str,
    reason: &UnresolvedReason,
    resolved: &IndexMap<String, Definition>,
) -> VerificationMessage {
    let (code, hint) = match reason {
        UnresolvedReason::MissingParent(id) => (codes::C_REF_UNRESOLVED_PARENT, suggest(id, resolved)),
        UnresolvedReason::MissingReference(id) => {
            (codes::C_REF_UNRESOLVED_REFERENCE, suggest(id, resolved))
        }
        UnresolvedReason::Cycle(_) => (codes::C_REF_CYCLE, None),
        UnresolvedReason::AncestorUnresolved(_) => (codes::C_REF_PARENT_FAILED, None),
    };
    let mut message = format!("Failed to resolve dependences for definition {key}: {reason}");
    if let Some(candidate) = hint {
        message.push_str(&format!(" (did you mean \"{candidate}\"?)"));
    }
    VerificationMessage::error(code, message).with_definition(key)
}

/// Closest identifier among the resolved definitions, if similar enough.
fn suggest(missing: &str, resolved: &IndexMap<String, Definition>) -> Option<String> {
    resolved
        .values()
        .map(|d| (strsim::jaro_winkler(missing, &d.identifier), &d.identifier))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, id)| id.clone())
}
