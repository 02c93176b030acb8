//! Structural merge over ordered, identity-keyed collections.
//!
//! Merge is strictly one-directional: the receiver keeps everything it
//! already has, gaps are filled from the source, and collection entries are
//! matched by identity and merged recursively. Source-only entries are deep
//! copied and appended after the receiver's own entries.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::model::{Definition, PropertyDefinition};

/// Identity-keyed, gap-filling merge.
pub trait Mergeable {
    /// Key matched between receiver and source collection entries.
    fn identity(&self) -> Cow<'_, str>;

    /// Fill unset values of `self` from `other`; never overwrite.
    fn merge_from(&mut self, other: &Self);
}

/// Copy `src` into `target` only when `target` is unset.
pub fn replace_if_none<T: Clone>(target: &mut Option<T>, src: &Option<T>) {
    if target.is_none() {
        target.clone_from(src);
    }
}

/// String counterpart of [`replace_if_none`] for required identifiers.
pub fn replace_if_empty(target: &mut String, src: &str) {
    if target.is_empty() && !src.is_empty() {
        *target = src.to_string();
    }
}

/// Merge `src` into `dest` by identity, building new entries with `factory`.
///
/// Entries found in both are merged in place; `src`-only entries are built
/// fresh, filled from the source and appended; `dest`-only entries are left
/// untouched.
pub fn merge_lists_with<T, F>(dest: &mut Vec<T>, src: &[T], factory: F)
where
    T: Mergeable,
    F: Fn() -> T,
{
    let mut index: HashMap<String, usize> = dest
        .iter()
        .enumerate()
        .map(|(i, item)| (item.identity().into_owned(), i))
        .collect();

    for item in src {
        let identity = item.identity();
        match index.get(identity.as_ref()) {
            Some(&i) => dest[i].merge_from(item),
            None => {
                let mut fresh = factory();
                fresh.merge_from(item);
                index.insert(identity.into_owned(), dest.len());
                dest.push(fresh);
            }
        }
    }
}

/// [`merge_lists_with`] using `Default` as the factory.
pub fn merge_lists<T: Mergeable + Default>(dest: &mut Vec<T>, src: &[T]) {
    merge_lists_with(dest, src, T::default);
}

/// Merge an optional nested entity: fill an absent receiver from a fresh copy.
pub fn merge_optional<T: Mergeable + Default>(dest: &mut Option<T>, src: &Option<T>) {
    let Some(src) = src else { return };
    dest.get_or_insert_with(T::default).merge_from(src);
}

/// Entities with an authoring `order` attribute.
pub trait Ordered {
    fn order(&self) -> Option<i32>;
}

impl Ordered for PropertyDefinition {
    fn order(&self) -> Option<i32> {
        self.order
    }
}

impl Ordered for crate::model::RegionDefinition {
    fn order(&self) -> Option<i32> {
        self.order
    }
}

impl Ordered for crate::model::TransitionDefinition {
    fn order(&self) -> Option<i32> {
        self.order
    }
}

/// Stable sort by `order`; unordered entries go after ordered ones and keep
/// their relative position. A list without any order is left as is.
pub fn sort_by_order<T: Ordered>(items: &mut [T]) {
    items.sort_by_key(|item| match item.order() {
        Some(o) => (0, o),
        None => (1, 0),
    });
}

// ── Definition merge (parent → child) ─────────────────────────

pub(crate) fn merge_definition(target: &mut Definition, parent: &Definition) {
    replace_if_empty(&mut target.identifier, &parent.identifier);
    replace_if_none(&mut target.container, &parent.container);
    replace_if_none(&mut target.purpose, &parent.purpose);
    replace_if_none(&mut target.expression, &parent.expression);

    merge_fields_and_regions(target, parent);

    merge_lists(&mut target.transitions, &parent.transitions);
    sort_by_order(&mut target.transitions);
    merge_lists(&mut target.conditions, &parent.conditions);

    // inherited only when the child declares none
    if target.allowed_children.is_empty() {
        merge_lists(&mut target.allowed_children, &parent.allowed_children);
    }
    if target.state_transitions.is_empty() {
        merge_lists(&mut target.state_transitions, &parent.state_transitions);
    }
}

/// Root fields and region fields merged with awareness of fields the child
/// moved between root level and regions.
fn merge_fields_and_regions(target: &mut Definition, parent: &Definition) {
    let parent_root: IndexMap<&str, &PropertyDefinition> = parent
        .fields
        .iter()
        .map(|f| (f.identifier.as_str(), f))
        .collect();
    let initial_root: HashSet<String> = target
        .fields
        .iter()
        .map(|f| f.identifier.clone())
        .collect();
    let target_region_of: HashMap<String, String> = target
        .regions
        .iter()
        .flat_map(|r| {
            r.fields
                .iter()
                .map(move |f| (f.identifier.clone(), r.identifier.clone()))
        })
        .collect();

    // Parent root fields the child moved into a region are not re-added at
    // root; parent region fields the child declares at root merge into it.
    let mut inherited: IndexMap<String, PropertyDefinition> = parent
        .fields
        .iter()
        .filter(|f| !target_region_of.contains_key(&f.identifier))
        .map(|f| (f.identifier.clone(), f.clone()))
        .collect();
    for field in parent.regions.iter().flat_map(|r| r.fields.iter()) {
        if initial_root.contains(&field.identifier) {
            inherited.insert(field.identifier.clone(), field.clone());
        }
    }
    let inherited: Vec<PropertyDefinition> = inherited.into_values().collect();
    merge_lists(&mut target.fields, &inherited);
    sort_by_order(&mut target.fields);

    merge_lists(&mut target.regions, &parent.regions);
    for region in &mut target.regions {
        region.fields.retain(|f| {
            if initial_root.contains(&f.identifier) {
                return false;
            }
            match target_region_of.get(&f.identifier) {
                Some(owner) => owner == &region.identifier,
                None => true,
            }
        });
        for field in &mut region.fields {
            if let Some(root) = parent_root.get(field.identifier.as_str()) {
                field.merge_from(root);
            }
        }
        sort_by_order(&mut region.fields);
    }
    sort_by_order(&mut target.regions);
}

// ── Template merge ────────────────────────────────────────────

/// Three-pass merge: copy the template collection into a buffer, rebuild the
/// target from its own entries, then merge the buffer in afterwards.
fn merge_with_template<T: Mergeable + Default>(target: &mut Vec<T>, template: &[T]) {
    let mut buffer: Vec<T> = Vec::with_capacity(template.len());
    merge_lists(&mut buffer, template);
    let own = std::mem::take(target);
    merge_lists(target, &own);
    merge_lists(target, &buffer);
}

/// Merge a template into a definition; local entries keep priority.
pub fn merge_template(target: &mut Definition, template: &Definition) {
    replace_if_none(&mut target.purpose, &template.purpose);
    replace_if_none(&mut target.expression, &template.expression);

    merge_with_template(&mut target.fields, &template.fields);
    sort_by_order(&mut target.fields);
    merge_with_template(&mut target.regions, &template.regions);
    sort_by_order(&mut target.regions);
    merge_with_template(&mut target.transitions, &template.transitions);
    sort_by_order(&mut target.transitions);
    merge_with_template(&mut target.state_transitions, &template.state_transitions);
    merge_with_template(&mut target.allowed_children, &template.allowed_children);
    merge_lists(&mut target.conditions, &template.conditions);
}
