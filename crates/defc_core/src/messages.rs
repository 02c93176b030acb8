//! Verification messages accumulated during a compile run.
//!
//! Codes follow `{STAGE}:{CATEGORY}:{CODE}`:
//!   F:*  fetch (download, schema, parse)
//!   C:*  compile (references, duplicates, validation)
//!   N:*  normalization
//!   P:*  persist decision

use serde::{Deserialize, Serialize};

pub mod codes {
    // ── Fetch (F:*) ───────────────────────────────────────────

    /// Source content could not be downloaded.
    pub const F_DOWNLOAD_FAILED: &str = "F:DOWNLOAD:FAILED";
    /// Source does not conform to the schema.
    pub const F_SCHEMA_INVALID: &str = "F:SCHEMA:INVALID";
    /// Source is not a well-formed document.
    pub const F_PARSE_SYNTAX: &str = "F:PARSE:SYNTAX";
    /// Parsed document could not be mapped to definitions.
    pub const F_PARSE_CONVERSION: &str = "F:PARSE:CONVERSION";
    /// Definition carries no identifier.
    pub const F_PARSE_MISSING_IDENTIFIER: &str = "F:PARSE:MISSING_IDENTIFIER";
    /// A regular source declared more than one definition.
    pub const F_PARSE_TOO_MANY: &str = "F:PARSE:TOO_MANY_DEFINITIONS";
    /// Source skipped by the tenant acceptance policy.
    pub const F_SOURCE_REJECTED: &str = "F:SOURCE:REJECTED";
    /// Label without identifier, duplicate or invalid label.
    pub const F_LABEL_INVALID: &str = "F:LABEL:INVALID";

    // ── Compile (C:*) ─────────────────────────────────────────

    /// Parent definition not present in the batch.
    pub const C_REF_UNRESOLVED_PARENT: &str = "C:REF:UNRESOLVED_PARENT";
    /// Referenced definition not present in the batch.
    pub const C_REF_UNRESOLVED_REFERENCE: &str = "C:REF:UNRESOLVED_REFERENCE";
    /// Definition inherits from itself, directly or transitively.
    pub const C_REF_CYCLE: &str = "C:REF:CYCLE";
    /// Parent or referenced definition was excluded.
    pub const C_REF_PARENT_FAILED: &str = "C:REF:PARENT_FAILED";
    /// `update_references` rejected the definition.
    pub const C_REF_RESOLUTION_FAILED: &str = "C:REF:RESOLUTION_FAILED";
    /// Same identifier and container declared by two sources.
    pub const C_DUP_IDENTIFIER: &str = "C:DUP:IDENTIFIER";
    /// Compiled definition failed validation.
    pub const C_VALIDATE_FAILED: &str = "C:VALIDATE:FAILED";
    /// Root definition failed the dry-run pass.
    pub const C_VALIDATE_DRY_RUN_FAILED: &str = "C:VALIDATE:DRY_RUN_FAILED";
    /// Cache warm-up failed; compilation continued.
    pub const C_CACHE_WARM_UP_FAILED: &str = "C:CACHE:WARM_UP_FAILED";
    /// Base definition had no enabled container to propagate into.
    pub const C_BASE_NO_CONTAINER: &str = "C:BASE:NO_CONTAINER";

    // ── Normalize (N:*) ───────────────────────────────────────

    /// Type declaration could not be parsed.
    pub const N_TYPE_INVALID: &str = "N:TYPE:INVALID";
    /// Type resolved to a name unknown to the dictionary.
    pub const N_TYPE_UNKNOWN: &str = "N:TYPE:UNKNOWN";
    /// Field declares no type at all.
    pub const N_TYPE_MISSING: &str = "N:TYPE:MISSING";
    /// Same field visible more than once.
    pub const N_FIELD_DUPLICATE: &str = "N:FIELD:DUPLICATE";
    /// System copies of a field differ.
    pub const N_FIELD_CONFLICT: &str = "N:FIELD:CONFLICT";
    /// Condition removed because its expression is invalid.
    pub const N_CONDITION_INVALID: &str = "N:CONDITION:INVALID";
    /// Field without identifier.
    pub const N_FIELD_MISSING_IDENTIFIER: &str = "N:FIELD:MISSING_IDENTIFIER";

    // ── Persist (P:*) ─────────────────────────────────────────

    /// Unchanged against the persisted revision; nothing written.
    pub const P_SKIP_UNCHANGED: &str = "P:SKIP:UNCHANGED";
    /// Revision advanced because content changed.
    pub const P_REVISION_BUMPED: &str = "P:REVISION:BUMPED";
    /// Persisted definition has no counterpart in this run.
    pub const P_GC_CANDIDATE: &str = "P:GC:CANDIDATE";
    /// Garbage-collection lookup failed.
    pub const P_GC_LOOKUP_FAILED: &str = "P:GC:LOOKUP_FAILED";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reportable finding. `definition` is the definition key, `source`
/// the provenance (file id or location) when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMessage {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl VerificationMessage {
    pub fn new(severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.into(),
            definition: None,
            source: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    pub fn with_definition(mut self, key: impl Into<String>) -> Self {
        self.definition = Some(key.into());
        self
    }

    pub fn with_source(mut self, source: Option<&str>) -> Self {
        self.source = source.map(str::to_string);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for VerificationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.severity, self.message)?;
        if let Some(def) = &self.definition {
            write!(f, " (definition {def})")?;
        }
        Ok(())
    }
}

/// Append-only message collector threaded through a run.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<VerificationMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: VerificationMessage) {
        self.messages.push(message);
    }

    pub fn error(&mut self, code: &str, message: impl Into<String>) -> &mut VerificationMessage {
        self.push_last(VerificationMessage::error(code, message))
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>) -> &mut VerificationMessage {
        self.push_last(VerificationMessage::warning(code, message))
    }

    fn push_last(&mut self, message: VerificationMessage) -> &mut VerificationMessage {
        self.messages.push(message);
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = VerificationMessage>) {
        self.messages.extend(other);
    }

    pub fn error_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_error()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(VerificationMessage::is_error)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerificationMessage> {
        self.messages.iter()
    }

    pub fn into_vec(self) -> Vec<VerificationMessage> {
        self.messages
    }
}
