//! Port traits: the compiler core is parameterised over these.
//! Implementations live in the runtime crate (filesystem, in-memory, JSON file).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::merge::merge_lists;
use crate::messages::{codes, MessageLog, VerificationMessage};
use crate::model::{DataTypeDefinition, Definition, DefinitionKind};
use crate::normalize::{self, NormalizeContext};
use crate::revision::content_equal;
use crate::source::LabelDefinition;

pub type Result<T> = std::result::Result<T, PortError>;

// ── Value types crossing ports ────────────────────────────────

/// Raw source handle: where a definition document lives and which
/// container it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub content_location: String,
}

impl FileDescriptor {
    pub fn new(id: impl Into<String>, container_id: Option<&str>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.map(str::to_string),
            content_location: location.into(),
        }
    }
}

/// Schema a source is validated against before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRef {
    pub name: String,
    /// Top-level keys the document may carry.
    pub allowed_keys: Vec<String>,
    /// Whether `definitions:` (a list) is accepted in place of `definition:`.
    pub allows_multiple: bool,
}

impl SchemaRef {
    /// Schema for a definition kind.
    pub fn for_kind(kind: DefinitionKind) -> Self {
        Self {
            name: format!("{kind}-definition"),
            allowed_keys: ["definition", "definitions", "labels", "filters"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            allows_multiple: kind.allows_multiple_per_source(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

// ── Ports ─────────────────────────────────────────────────────

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Every source holding definitions of `kind`.
    async fn sources(&self, kind: DefinitionKind) -> Result<Vec<FileDescriptor>>;
}

#[async_trait]
pub trait ContentService: Send + Sync {
    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>>;
}

pub trait SchemaValidator: Send + Sync {
    /// Empty result means the document conforms.
    fn validate(&self, raw: &[u8], schema: &SchemaRef) -> Vec<SchemaViolation>;
}

pub trait DataTypeLookup: Send + Sync {
    fn data_type(&self, name: &str) -> Option<DataTypeDefinition>;
}

/// Definition cache: data types plus the last persisted definitions.
#[async_trait]
pub trait DictionaryService: DataTypeLookup {
    async fn find_persisted(
        &self,
        identifier: &str,
        container: Option<&str>,
    ) -> Result<Option<Definition>>;

    fn is_definition_equal(&self, a: &Definition, b: &Definition) -> bool {
        content_equal(a, b)
    }
}

/// Storage for the auxiliary artifacts bundled with definitions.
#[async_trait]
pub trait AuxiliaryStore: Send + Sync {
    async fn save_labels(&self, labels: Vec<LabelDefinition>) -> Result<()>;
    async fn save_filters(&self, filters: Vec<crate::source::FilterDefinition>) -> Result<()>;
}

/// Lookup of definitions already compiled in the current run.
pub trait DefinitionResolver {
    fn resolve(&self, key: &str) -> Option<&Definition>;
}

/// Per-kind compile contract. Defaults run the standard normalizer; a kind
/// overrides only what differs.
#[async_trait]
pub trait CompilerCallback: Send + Sync {
    fn kind(&self) -> DefinitionKind;

    fn callback_name(&self) -> &str;

    fn schema(&self) -> SchemaRef {
        SchemaRef::for_kind(self.kind())
    }

    fn extract_definition_id(&self, def: &Definition) -> Option<String> {
        let id = def.identifier.trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    fn normalize_fields(&self, def: &mut Definition, ctx: &NormalizeContext<'_>, log: &mut MessageLog) {
        normalize::normalize_fields(def, ctx, log);
    }

    fn prepare_for_persist(&self, def: &mut Definition, ctx: &NormalizeContext<'_>, log: &mut MessageLog) {
        normalize::remove_deleted_elements(def);
        normalize::synch_region_properties(def, log);
        normalize::validate_conditions(def, log);
        normalize::optimize_state_transitions(def);
        normalize::set_default_properties(def, ctx.model_prefix);
    }

    fn validate_compiled_definition(&self, def: &Definition, log: &mut MessageLog) -> bool {
        normalize::validate_definition(def, log)
    }

    /// Expand the reference axis: fields of the referenced definition are
    /// merged in behind the definition's own.
    fn update_references(
        &self,
        def: &mut Definition,
        resolver: &dyn DefinitionResolver,
        log: &mut MessageLog,
    ) -> bool {
        let Some(reference_key) = def.reference_key() else {
            return true;
        };
        match resolver.resolve(&reference_key) {
            Some(referenced) => {
                merge_lists(&mut def.fields, &referenced.fields);
                true
            }
            None => {
                log.push(
                    VerificationMessage::error(
                        codes::C_REF_RESOLUTION_FAILED,
                        format!("Referenced definition {reference_key} could not be resolved"),
                    )
                    .with_definition(def.key()),
                );
                false
            }
        }
    }

    fn set_property_revision(&self, def: &mut Definition) {
        let revision = def.revision;
        normalize::set_property_revision(def, revision);
    }

    fn validate_label(&self, label: &LabelDefinition) -> bool {
        !label.labels.is_empty()
    }

    async fn warm_up_cache(&self) -> Result<()> {
        Ok(())
    }

    async fn find_template_in_system(&self, def: &Definition) -> Result<Option<Definition>>;

    /// Write the definition. Called after [`save_template_properties`]
    /// succeeded for the same revision; a failure here aborts the run with
    /// the properties already written, so implementations backed by a
    /// transactional store should enlist both writes in one transaction.
    ///
    /// [`save_template_properties`]: CompilerCallback::save_template_properties
    async fn save_template(&self, def: &Definition) -> Result<()>;

    /// Write the property set of a new revision. Always precedes
    /// [`save_template`](CompilerCallback::save_template).
    async fn save_template_properties(
        &self,
        def: &Definition,
        existing: Option<&Definition>,
    ) -> Result<()>;

    /// Keys of every persisted definition of this kind.
    async fn persisted_identifiers(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn has_live_instances(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}
