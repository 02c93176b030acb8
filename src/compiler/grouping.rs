//! Grouping: duplicate check, split by container, base propagation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use defc_core::{codes, Definition, MessageLog, VerificationMessage};
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Definitions of one container (`None` for container-less templates).
pub type ContainerGroups = BTreeMap<Option<String>, IndexMap<String, Definition>>;

/// Drop every `(identifier, container)` declared by more than one source.
/// One message per colliding pair names both sources.
pub fn remove_duplicates(definitions: Vec<Definition>, log: &mut MessageLog) -> Vec<Definition> {
    let mut first_seen: IndexMap<String, Definition> = IndexMap::new();
    let mut duplicated: HashSet<String> = HashSet::new();
    let mut first_provenance: IndexMap<String, Option<String>> = IndexMap::new();

    for def in definitions {
        let key = def.key();
        if let Some(earlier) = first_provenance.get(&key) {
            let earlier = earlier.as_deref().unwrap_or("<unknown>");
            let later = def.provenance().unwrap_or("<unknown>");
            warn!(definition = %key, "Duplicate definition found in {earlier} and {later}");
            log.push(
                VerificationMessage::error(
                    codes::C_DUP_IDENTIFIER,
                    format!(
                        "Duplicate definition {} found in {earlier} and {later}. Both are skipped",
                        def.identifier
                    ),
                )
                .with_definition(&key)
                .with_source(def.provenance()),
            );
            duplicated.insert(key);
            continue;
        }
        first_provenance.insert(key.clone(), def.provenance().map(str::to_string));
        first_seen.insert(key, def);
    }

    first_seen
        .into_iter()
        .filter(|(key, _)| !duplicated.contains(key))
        .map(|(_, def)| def)
        .collect()
}

/// Split into per-container groups. With `propagate_base`, container-less
/// definitions are cloned into each target container lacking a local
/// override and do not form a group of their own.
pub fn group_by_container(
    definitions: Vec<Definition>,
    propagate_base: bool,
    enabled: &BTreeSet<String>,
    log: &mut MessageLog,
) -> ContainerGroups {
    let mut groups: ContainerGroups = BTreeMap::new();
    let mut base: Vec<Definition> = Vec::new();

    for def in definitions {
        if propagate_base && def.is_base() {
            base.push(def);
        } else {
            groups
                .entry(def.container.clone())
                .or_default()
                .insert(def.key(), def);
        }
    }

    if base.is_empty() {
        return groups;
    }

    let targets: BTreeSet<String> = if enabled.is_empty() {
        groups.keys().flatten().cloned().collect()
    } else {
        enabled.clone()
    };
    if targets.is_empty() {
        for def in &base {
            log.push(
                VerificationMessage::warning(
                    codes::C_BASE_NO_CONTAINER,
                    format!(
                        "Base definition {} has no enabled container to be copied into",
                        def.identifier
                    ),
                )
                .with_definition(def.key())
                .with_source(def.provenance()),
            );
        }
        return groups;
    }

    for container in &targets {
        let group = groups.entry(Some(container.clone())).or_default();
        for def in &base {
            let mut copy = def.clone();
            copy.container = Some(container.clone());
            let key = copy.key();
            if group.contains_key(&key) {
                debug!(definition = %key, "local override wins over base definition");
                continue;
            }
            group.insert(key, copy);
        }
    }
    groups
}
