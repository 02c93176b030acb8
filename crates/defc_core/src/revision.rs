//! Structural content hashing and the persist decision.
//!
//! Algorithm:
//!   1. Clone the definition and clear volatile data (revisions, DMS id,
//!      source location) at every nesting level
//!   2. Render canonical JSON (field order fixed by the type, collections
//!      keep their order)
//!   3. Hash: SHA-256 of ("v1:" + JSON)

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{ControlDefinition, Definition, PropertyDefinition};
use crate::normalize::set_property_revision;

/// Current hash version prefix.
pub const HASH_VERSION: &str = "v1";

/// Hex-encoded structural hash of a definition, ignoring volatile data.
pub fn content_hash(def: &Definition) -> String {
    let mut view = def.clone();
    view.revision = 0;
    view.dms_id = None;
    view.source_location = None;
    set_property_revision(&mut view, 0);
    hash_json(&view)
}

/// Hash of a single field, used to compare duplicate system copies.
pub fn field_hash(field: &PropertyDefinition) -> String {
    let mut view = field.clone();
    clear_field_revision(&mut view);
    hash_json(&view)
}

fn clear_field_revision(field: &mut PropertyDefinition) {
    field.revision = 0;
    if let Some(ControlDefinition { fields, .. }) = &mut field.control_definition {
        fields.iter_mut().for_each(clear_field_revision);
    }
}

fn hash_json<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:", HASH_VERSION).as_bytes());
    // Serializing plain structs with string keys cannot fail.
    if let Ok(json) = serde_json::to_vec(value) {
        hasher.update(&json);
    }
    hex::encode(hasher.finalize())
}

/// Structural equality modulo volatile data.
pub fn content_equal(a: &Definition, b: &Definition) -> bool {
    content_hash(a) == content_hash(b)
}

/// Outcome of comparing a compiled definition with its persisted version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "revision", rename_all = "snake_case")]
pub enum RevisionDecision {
    /// Content-equal to the persisted version; nothing is written.
    Skip,
    /// Persist under this revision.
    PersistAsRevision(i64),
}

impl RevisionDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// Decide using structural equality.
pub fn decide(new: &Definition, existing: Option<&Definition>) -> RevisionDecision {
    decide_with(new, existing, content_equal)
}

/// Decide with an injected equality (e.g. the dictionary's comparator).
pub fn decide_with<F>(new: &Definition, existing: Option<&Definition>, equal: F) -> RevisionDecision
where
    F: FnOnce(&Definition, &Definition) -> bool,
{
    match existing {
        None if new.revision > 0 => RevisionDecision::PersistAsRevision(new.revision),
        None => RevisionDecision::PersistAsRevision(1),
        Some(existing) if equal(new, existing) => RevisionDecision::Skip,
        Some(existing) => RevisionDecision::PersistAsRevision(existing.revision + 1),
    }
}

/// Stamp `revision` on the definition and everything nested in it.
pub fn apply_revision(def: &mut Definition, revision: i64) {
    def.revision = revision;
    set_property_revision(def, revision);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RegionDefinition, TransitionDefinition};

    fn sample() -> Definition {
        let mut d = Definition::new("case");
        d.container = Some("t1".into());
        let mut f = PropertyDefinition::new("title");
        f.type_name = Some("an..180".into());
        d.fields.push(f);
        let mut r = RegionDefinition::new("details");
        r.fields.push(PropertyDefinition::new("note"));
        d.regions.push(r);
        d
    }

    #[test]
    fn test_hash_is_deterministic_and_hex() {
        let h1 = content_hash(&sample());
        let h2 = content_hash(&sample());
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_ignores_volatile_data() {
        let a = sample();
        let mut b = sample();
        apply_revision(&mut b, 7);
        b.dms_id = Some("file-42".into());
        b.source_location = Some("defs/case.yaml".into());
        assert!(content_equal(&a, &b));
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let a = sample();
        let mut b = sample();
        b.fields.push(PropertyDefinition::new("extra"));
        assert!(!content_equal(&a, &b));

        let mut c = sample();
        c.fields.insert(0, PropertyDefinition::new("extra"));
        assert!(!content_equal(&b, &c));
    }

    #[test]
    fn test_decide() {
        let new = sample();
        assert_eq!(decide(&new, None), RevisionDecision::PersistAsRevision(1));

        let mut preassigned = sample();
        preassigned.revision = 4;
        assert_eq!(
            decide(&preassigned, None),
            RevisionDecision::PersistAsRevision(4)
        );

        let mut stored = sample();
        apply_revision(&mut stored, 3);
        assert_eq!(decide(&new, Some(&stored)), RevisionDecision::Skip);

        let mut changed = sample();
        changed.fields[0].default_value = Some("x".into());
        assert_eq!(
            decide(&changed, Some(&stored)),
            RevisionDecision::PersistAsRevision(4)
        );
    }

    #[test]
    fn test_apply_revision_reaches_nested() {
        let mut d = sample();
        d.transitions.push(TransitionDefinition::default());
        apply_revision(&mut d, 9);
        assert_eq!(d.revision, 9);
        assert_eq!(d.fields[0].revision, 9);
        assert_eq!(d.regions[0].fields[0].revision, 9);
        assert_eq!(d.transitions[0].revision, 9);
    }

    #[test]
    fn test_field_hash_ignores_revision() {
        let a = PropertyDefinition::new("x");
        let mut b = a.clone();
        b.revision = 5;
        assert_eq!(field_hash(&a), field_hash(&b));
        b.uri = Some("emf:x".into());
        assert_ne!(field_hash(&a), field_hash(&b));
    }
}
