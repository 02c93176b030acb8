//! Intermediate source representation and its mapping to domain definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Definition, DefinitionKind};

/// A parsed source document: one definition (regular kinds) or several
/// (templates), plus the labels and filters bundled with them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceDocument {
    pub definition: Option<Definition>,
    pub definitions: Vec<Definition>,
    pub labels: Vec<LabelDefinition>,
    pub filters: Vec<FilterDefinition>,
}

/// Localised label set, keyed by language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("source declares no definition")]
    NoDefinition,

    #[error("source declares {0} definitions, expected exactly one")]
    TooMany(usize),
}

/// Domain content of one source after mapping.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub definitions: Vec<Definition>,
    pub labels: Vec<LabelDefinition>,
    pub filters: Vec<FilterDefinition>,
}

impl SourceDocument {
    /// Map into domain definitions of `kind`. Regular kinds require exactly
    /// one definition per source.
    pub fn into_parsed(self, kind: DefinitionKind) -> Result<ParsedSource, ConversionError> {
        let mut definitions: Vec<Definition> = self.definition.into_iter().collect();
        definitions.extend(self.definitions);

        if definitions.is_empty() {
            return Err(ConversionError::NoDefinition);
        }
        if definitions.len() > 1 && !kind.allows_multiple_per_source() {
            return Err(ConversionError::TooMany(definitions.len()));
        }
        for def in &mut definitions {
            def.kind = kind;
        }

        Ok(ParsedSource {
            definitions,
            labels: self.labels,
            filters: self.filters,
        })
    }
}
