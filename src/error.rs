//! Error types for the compiler runtime.
//!
//! Per-definition problems never surface here; they are accumulated as
//! `VerificationMessage`s. `CompileError` is reserved for failures that
//! abort a whole run.

use defc_core::ports::SchemaViolation;
use defc_core::source::ConversionError;
use defc_core::{codes, PortError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Another compilation run holds the single-flight guard.
    #[error("a compilation run is already in progress")]
    Busy,

    #[error("failed to list sources: {0}")]
    Sources(#[source] PortError),

    /// A persist write failed; the batch is aborted.
    #[error("failed to persist definition {definition}: {source}")]
    Persistence {
        definition: String,
        #[source]
        source: PortError,
    },

    #[error("compile task failed: {0}")]
    Task(String),
}

/// Why a single source produced no definitions.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to download content: {0}")]
    Download(#[source] PortError),

    #[error("schema validation failed: {}", join_violations(.0))]
    Schema(Vec<SchemaViolation>),

    #[error("malformed document: {0}")]
    Syntax(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Invalid definition. NO definition ID!")]
    MissingIdentifier,

    #[error("fetch task failed: {0}")]
    Task(String),
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Download(_) | Self::Task(_) => codes::F_DOWNLOAD_FAILED,
            Self::Schema(_) => codes::F_SCHEMA_INVALID,
            Self::Syntax(_) => codes::F_PARSE_SYNTAX,
            Self::Conversion(ConversionError::TooMany(_)) => codes::F_PARSE_TOO_MANY,
            Self::Conversion(_) => codes::F_PARSE_CONVERSION,
            Self::MissingIdentifier => codes::F_PARSE_MISSING_IDENTIFIER,
        }
    }
}
