//! Structural schema check on the raw YAML/JSON tree, before typed parsing.
//!
//! Only shape is checked here: allowed top-level keys, one vs. many
//! definitions, and list-valued sections. Documents that do not parse at all
//! pass through so the parser reports the syntax error with its position.

use defc_core::ports::{SchemaRef, SchemaValidator, SchemaViolation};
use serde_yaml::{Mapping, Value};

/// Definition sections that must be lists when present.
const LIST_SECTIONS: &[&str] = &[
    "fields",
    "regions",
    "transitions",
    "conditions",
    "allowed_children",
    "state_transitions",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralSchemaValidator;

impl StructuralSchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

fn violation(path: impl Into<String>, message: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.into(),
        message: message.into(),
    }
}

fn check_definition(path: &str, value: &Value, out: &mut Vec<SchemaViolation>) {
    let Some(map) = value.as_mapping() else {
        out.push(violation(path, "expected a mapping"));
        return;
    };
    for section in LIST_SECTIONS {
        if let Some(v) = map.get(*section) {
            if !v.is_sequence() && !v.is_null() {
                out.push(violation(format!("{path}.{section}"), "expected a list"));
            }
        }
    }
}

fn check_list(doc: &Mapping, key: &str, out: &mut Vec<SchemaViolation>) {
    if let Some(v) = doc.get(key) {
        if !v.is_sequence() && !v.is_null() {
            out.push(violation(key, "expected a list"));
        }
    }
}

impl SchemaValidator for StructuralSchemaValidator {
    fn validate(&self, raw: &[u8], schema: &SchemaRef) -> Vec<SchemaViolation> {
        let Ok(doc) = serde_yaml::from_slice::<Value>(raw) else {
            return Vec::new();
        };
        let Some(doc) = doc.as_mapping() else {
            return vec![violation("$", format!("{} document must be a mapping", schema.name))];
        };

        let mut out = Vec::new();
        for key in doc.keys() {
            match key.as_str() {
                Some(k) if schema.allowed_keys.iter().any(|a| a == k) => {}
                Some(k) => out.push(violation(k, "unknown top-level key")),
                None => out.push(violation("$", "top-level keys must be strings")),
            }
        }

        if let Some(def) = doc.get("definition") {
            check_definition("definition", def, &mut out);
        }
        match doc.get("definitions") {
            Some(_) if !schema.allows_multiple => out.push(violation(
                "definitions",
                format!("{} sources declare a single definition", schema.name),
            )),
            Some(Value::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    check_definition(&format!("definitions[{i}]"), item, &mut out);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => out.push(violation("definitions", "expected a list")),
        }
        check_list(doc, "labels", &mut out);
        check_list(doc, "filters", &mut out);
        out
    }
}
