//! Dependency ordering over the parent and reference axes.
//!
//! Each pass walks every definition's chain up to a root (or to an already
//! ordered ancestor), then appends the chain root-first. Definitions whose
//! chain cannot be completed are reported and dropped; other chains are
//! unaffected. Ties keep input order.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::Definition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortAxis {
    Parent,
    Reference,
}

impl SortAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Reference => "reference",
        }
    }

    /// Raw id of the definition's ancestor on this axis.
    pub fn parent_id<'a>(&self, def: &'a Definition) -> Option<&'a str> {
        match self {
            Self::Parent => def.parent_definition_id.as_deref(),
            Self::Reference => def.reference_id.as_deref(),
        }
    }

    /// Working-map key of the ancestor on this axis.
    pub fn parent_key(&self, def: &Definition) -> Option<String> {
        match self {
            Self::Parent => def.parent_key(),
            Self::Reference => def.reference_key(),
        }
    }

    fn missing(&self, id: &str) -> UnresolvedReason {
        match self {
            Self::Parent => UnresolvedReason::MissingParent(id.to_string()),
            Self::Reference => UnresolvedReason::MissingReference(id.to_string()),
        }
    }
}

impl std::fmt::Display for SortAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a definition could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "id", rename_all = "snake_case")]
pub enum UnresolvedReason {
    MissingParent(String),
    MissingReference(String),
    /// Chain returns to a definition already on it; carries the repeated id.
    Cycle(String),
    /// An ancestor was itself unresolved earlier in the pass.
    AncestorUnresolved(String),
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingParent(id) => write!(f, "parent \"{id}\" not found"),
            Self::MissingReference(id) => write!(f, "reference \"{id}\" not found"),
            Self::Cycle(id) => write!(f, "inheritance cycle through \"{id}\""),
            Self::AncestorUnresolved(id) => write!(f, "ancestor \"{id}\" is unresolved"),
        }
    }
}

/// Order `defs` so every ancestor on `axis` precedes its descendants.
///
/// Unresolved definitions are removed from `defs` and returned.
pub fn sort_definitions(
    defs: &mut IndexMap<String, Definition>,
    axis: SortAxis,
) -> IndexMap<String, UnresolvedReason> {
    sort_definitions_after(defs, axis, &IndexMap::new())
}

/// Like [`sort_definitions`], but ancestors listed in `earlier` (dropped by a
/// previous pass) are reported as unresolved rather than missing.
pub fn sort_definitions_after(
    defs: &mut IndexMap<String, Definition>,
    axis: SortAxis,
    earlier: &IndexMap<String, UnresolvedReason>,
) -> IndexMap<String, UnresolvedReason> {
    let mut input = std::mem::take(defs);
    let mut ordered: IndexMap<String, Definition> = IndexMap::with_capacity(input.len());
    let mut unresolved: IndexMap<String, UnresolvedReason> = IndexMap::new();
    let keys: Vec<String> = input.keys().cloned().collect();

    for key in keys {
        if ordered.contains_key(&key) || !input.contains_key(&key) {
            continue;
        }
        match walk_chain(&key, &input, &ordered, &unresolved, earlier, axis) {
            Ok(chain) => {
                for link in chain.into_iter().rev() {
                    if let Some(def) = input.swap_remove(&link) {
                        ordered.insert(link, def);
                    }
                }
            }
            Err(reason) => {
                let def = &input[&key];
                warn!(
                    axis = %axis,
                    "Failed to resolve dependences for definition \"{}\" with {} \"{}\": {}",
                    def.identifier,
                    axis,
                    axis.parent_id(def).unwrap_or_default(),
                    reason
                );
                input.swap_remove(&key);
                unresolved.insert(key, reason);
            }
        }
    }

    debug!(
        axis = %axis,
        order = ?ordered.keys().collect::<Vec<_>>(),
        "sorted definitions"
    );
    *defs = ordered;
    unresolved
}

/// Collect the chain from `start` up to the first root or ordered ancestor.
fn walk_chain(
    start: &str,
    input: &IndexMap<String, Definition>,
    ordered: &IndexMap<String, Definition>,
    unresolved: &IndexMap<String, UnresolvedReason>,
    earlier: &IndexMap<String, UnresolvedReason>,
    axis: SortAxis,
) -> Result<Vec<String>, UnresolvedReason> {
    let mut chain = vec![start.to_string()];
    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut current = &input[start];

    loop {
        let (Some(raw), Some(parent_key)) = (axis.parent_id(current), axis.parent_key(current))
        else {
            return Ok(chain);
        };
        if raw == current.identifier || visited.contains(&parent_key) {
            return Err(UnresolvedReason::Cycle(raw.to_string()));
        }
        if ordered.contains_key(&parent_key) {
            return Ok(chain);
        }
        if unresolved.contains_key(&parent_key) || earlier.contains_key(&parent_key) {
            return Err(UnresolvedReason::AncestorUnresolved(raw.to_string()));
        }
        let Some(parent) = input.get(&parent_key) else {
            return Err(axis.missing(raw));
        };
        visited.insert(parent_key.clone());
        chain.push(parent_key);
        current = parent;
    }
}

/// Parent pass followed by a reference pass; unresolved results are unioned.
pub fn sort_both_axes(defs: &mut IndexMap<String, Definition>) -> IndexMap<String, UnresolvedReason> {
    let mut unresolved = sort_definitions(defs, SortAxis::Parent);
    let references = sort_definitions_after(defs, SortAxis::Reference, &unresolved);
    unresolved.extend(references);
    unresolved
}
