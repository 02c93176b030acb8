//! Definition normalization: field stamping and type resolution, clean-up of
//! deleted and system elements, condition checks, state-transition ordering.
//!
//! All operations are pure over `&mut Definition`; findings go to a
//! [`MessageLog`].

use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::merge::{sort_by_order, Mergeable};
use crate::messages::{codes, MessageLog, VerificationMessage};
use crate::model::{
    ConditionDefinition, ControlDefinition, Definition, DisplayType, PropertyDefinition,
    StateTransition,
};
use crate::ports::DataTypeLookup;
use crate::revision::field_hash;
use crate::type_parser;

static FIELD_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").expect("static regex is valid"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex is valid"));

/// What normalization needs from its environment.
#[derive(Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub types: &'a dyn DataTypeLookup,
    /// Prefix for generated `dms_type` values, e.g. `emf:`.
    pub model_prefix: &'a str,
}

// ── Fields ────────────────────────────────────────────────────

/// Sort, trim, stamp container/path and resolve data types for every field.
pub fn normalize_fields(def: &mut Definition, ctx: &NormalizeContext<'_>, log: &mut MessageLog) {
    let key = def.key();
    let container = def.container.clone();
    let root = def.identifier.clone();
    let scope = FieldScope {
        key: &key,
        container: container.as_deref(),
        types: ctx.types,
    };

    sort_by_order(&mut def.fields);
    for field in &mut def.fields {
        scope.normalize_field(field, &root, log);
    }
    for region in &mut def.regions {
        let path = format!("{root}/{}", region.identifier);
        sort_by_order(&mut region.fields);
        for field in &mut region.fields {
            scope.normalize_field(field, &path, log);
        }
        if let Some(control) = &mut region.control_definition {
            scope.normalize_control(control, &path, log);
        }
    }
    for transition in &mut def.transitions {
        let path = format!("{root}/{}", transition.identifier);
        for field in &mut transition.fields {
            scope.normalize_field(field, &path, log);
        }
    }
}

struct FieldScope<'a> {
    key: &'a str,
    container: Option<&'a str>,
    types: &'a dyn DataTypeLookup,
}

impl FieldScope<'_> {
    fn normalize_field(&self, field: &mut PropertyDefinition, path: &str, log: &mut MessageLog) {
        if field.identifier.trim().is_empty() {
            log.push(
                VerificationMessage::error(
                    codes::N_FIELD_MISSING_IDENTIFIER,
                    format!("Found field without identifier under {path}"),
                )
                .with_definition(self.key),
            );
            return;
        }

        if let Some(value) = field.default_value.take() {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                field.default_value = Some(trimmed.to_string());
            }
        }
        field.container = self.container.map(str::to_string);
        field.parent_path = Some(path.to_string());

        if field.data_type.is_none() {
            if let Some(raw) = field.type_name.clone() {
                self.resolve_type(field, &raw, log);
            }
        }

        if let Some(control) = &mut field.control_definition {
            let nested = format!("{path}/{}", field.identifier);
            self.normalize_control(control, &nested, log);
        }
    }

    fn resolve_type(&self, field: &mut PropertyDefinition, raw: &str, log: &mut MessageLog) {
        let descriptor = match type_parser::parse(raw) {
            Ok(d) => d,
            Err(e) => {
                log.push(
                    VerificationMessage::error(
                        codes::N_TYPE_INVALID,
                        format!("Invalid type '{raw}' for field {}: {e}", field.identifier),
                    )
                    .with_definition(self.key),
                );
                return;
            }
        };
        match self.types.data_type(descriptor.data_type_name()) {
            Some(data_type) => {
                field.data_type = Some(data_type);
                if descriptor.is_alpha() || descriptor.is_numeric() {
                    field.max_length = descriptor.max_length;
                }
            }
            None => {
                log.push(
                    VerificationMessage::error(
                        codes::N_TYPE_UNKNOWN,
                        format!(
                            "No data type definition found for '{}' (field {}, type '{raw}')",
                            descriptor.data_type_name(),
                            field.identifier
                        ),
                    )
                    .with_definition(self.key),
                );
            }
        }
    }

    fn normalize_control(&self, control: &mut ControlDefinition, path: &str, log: &mut MessageLog) {
        sort_by_order(&mut control.fields);
        for field in &mut control.fields {
            self.normalize_field(field, path, log);
        }
    }
}

// ── Clean-up ──────────────────────────────────────────────────

fn is_deleted(display_type: Option<DisplayType>) -> bool {
    display_type == Some(DisplayType::Delete)
}

fn remove_deleted_fields(fields: &mut Vec<PropertyDefinition>) {
    fields.retain(|f| !is_deleted(f.display_type));
    for field in fields.iter_mut() {
        if let Some(control) = &mut field.control_definition {
            remove_deleted_fields(&mut control.fields);
        }
    }
}

/// Drop fields, regions and transitions marked DELETE, at every level.
pub fn remove_deleted_elements(def: &mut Definition) {
    remove_deleted_fields(&mut def.fields);
    def.regions.retain(|r| !is_deleted(r.display_type));
    for region in &mut def.regions {
        remove_deleted_fields(&mut region.fields);
        if let Some(control) = &mut region.control_definition {
            remove_deleted_fields(&mut control.fields);
        }
    }
    def.transitions.retain(|t| !is_deleted(t.display_type));
    for transition in &mut def.transitions {
        remove_deleted_fields(&mut transition.fields);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Root(usize),
    Region(usize, usize),
}

/// Drop SYSTEM regions, then resolve fields declared more than once across
/// root level and regions.
pub fn synch_region_properties(def: &mut Definition, log: &mut MessageLog) {
    def.regions
        .retain(|r| r.display_type != Some(DisplayType::System));

    let mut occurrences: IndexMap<String, Vec<Slot>> = IndexMap::new();
    for (i, f) in def.fields.iter().enumerate() {
        occurrences
            .entry(f.identifier.clone())
            .or_default()
            .push(Slot::Root(i));
    }
    for (r, region) in def.regions.iter().enumerate() {
        for (i, f) in region.fields.iter().enumerate() {
            occurrences
                .entry(f.identifier.clone())
                .or_default()
                .push(Slot::Region(r, i));
        }
    }

    let key = def.key();
    let mut removed: HashSet<Slot> = HashSet::new();
    for (identifier, slots) in occurrences.iter().filter(|(_, s)| s.len() > 1) {
        let visible: Vec<Slot> = slots
            .iter()
            .copied()
            .filter(|s| field_at(def, *s).effective_display_type().is_visible())
            .collect();
        match visible.as_slice() {
            [] => {
                let first = field_hash(field_at(def, slots[0]));
                if slots[1..].iter().all(|s| field_hash(field_at(def, *s)) == first) {
                    removed.extend(slots[1..].iter().copied());
                } else {
                    warn!(definition = %key, field = %identifier, "conflicting system fields");
                    log.push(
                        VerificationMessage::warning(
                            codes::N_FIELD_CONFLICT,
                            format!("System field {identifier} is declared more than once with different content"),
                        )
                        .with_definition(&key),
                    );
                }
            }
            [target] => {
                let system: Vec<PropertyDefinition> = slots
                    .iter()
                    .filter(|s| *s != target)
                    .map(|s| field_at(def, *s).clone())
                    .collect();
                let visible_field = field_at_mut(def, *target);
                for copy in &system {
                    visible_field.merge_from(copy);
                }
                removed.extend(slots.iter().copied().filter(|s| s != target));
            }
            _ => {
                log.push(
                    VerificationMessage::error(
                        codes::N_FIELD_DUPLICATE,
                        format!("Field {identifier} is visible {} times", visible.len()),
                    )
                    .with_definition(&key),
                );
            }
        }
    }

    if removed.is_empty() {
        return;
    }
    let mut i = 0;
    def.fields.retain(|_| {
        let keep = !removed.contains(&Slot::Root(i));
        i += 1;
        keep
    });
    for (r, region) in def.regions.iter_mut().enumerate() {
        let mut i = 0;
        region.fields.retain(|_| {
            let keep = !removed.contains(&Slot::Region(r, i));
            i += 1;
            keep
        });
    }
}

fn field_at(def: &Definition, slot: Slot) -> &PropertyDefinition {
    match slot {
        Slot::Root(i) => &def.fields[i],
        Slot::Region(r, i) => &def.regions[r].fields[i],
    }
}

fn field_at_mut(def: &mut Definition, slot: Slot) -> &mut PropertyDefinition {
    match slot {
        Slot::Root(i) => &mut def.fields[i],
        Slot::Region(r, i) => &mut def.regions[r].fields[i],
    }
}

// ── Conditions ────────────────────────────────────────────────

/// Keep only conditions whose expression is ASCII and references known
/// fields; collapse repeated whitespace in the survivors.
pub fn validate_conditions(def: &mut Definition, log: &mut MessageLog) {
    let known: HashSet<String> = def
        .all_fields()
        .filter(|f| !is_deleted(f.display_type))
        .flat_map(|f| [f.identifier.clone(), f.effective_name().to_string()])
        .collect();
    let key = def.key();
    let mut check = |conditions: &mut Vec<ConditionDefinition>, owner: &str| {
        conditions.retain_mut(|c| match check_expression(c, &known) {
            Ok(()) => true,
            Err(reason) => {
                log.push(
                    VerificationMessage::warning(
                        codes::N_CONDITION_INVALID,
                        format!("Removed condition {} on {owner}: {reason}", c.identifier),
                    )
                    .with_definition(&key),
                );
                false
            }
        });
    };

    let root = def.identifier.clone();
    check(&mut def.conditions, &root);
    for field in &mut def.fields {
        check(&mut field.conditions, &field.identifier);
    }
    for region in &mut def.regions {
        check(&mut region.conditions, &region.identifier);
        for field in &mut region.fields {
            check(&mut field.conditions, &field.identifier);
        }
    }
    for transition in &mut def.transitions {
        check(&mut transition.conditions, &transition.identifier);
    }
    for st in &mut def.state_transitions {
        let owner = st.group_key();
        check(&mut st.conditions, &owner);
    }
}

fn check_expression(
    condition: &mut ConditionDefinition,
    known: &HashSet<String>,
) -> Result<(), String> {
    let Some(expression) = condition.expression.as_deref() else {
        return Err("no expression".to_string());
    };
    let collapsed = WHITESPACE.replace_all(expression.trim(), " ").into_owned();
    if collapsed.is_empty() {
        return Err("empty expression".to_string());
    }
    if !collapsed.is_ascii() {
        return Err("expression contains non-ASCII characters".to_string());
    }
    let missing: Vec<&str> = FIELD_REF
        .captures_iter(&collapsed)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| !known.contains(*name))
        .collect();
    if !missing.is_empty() {
        return Err(format!("unknown fields {}", missing.join(", ")));
    }
    condition.expression = Some(collapsed);
    Ok(())
}

// ── State transitions ─────────────────────────────────────────

/// Group by `from|transition`; conditional edges first, unconditional edges
/// de-duplicated by target state and moved last.
pub fn optimize_state_transitions(def: &mut Definition) {
    if def.state_transitions.is_empty() {
        return;
    }
    let mut groups: IndexMap<String, Vec<StateTransition>> = IndexMap::new();
    for st in std::mem::take(&mut def.state_transitions) {
        groups.entry(st.group_key()).or_default().push(st);
    }

    for (_, group) in groups {
        let (conditional, unconditional): (Vec<_>, Vec<_>) =
            group.into_iter().partition(|st| !st.conditions.is_empty());
        def.state_transitions.extend(conditional);
        let mut seen: HashSet<String> = HashSet::new();
        def.state_transitions.extend(
            unconditional
                .into_iter()
                .filter(|st| seen.insert(st.to_state.clone())),
        );
    }
}

// ── Defaults & revisions ──────────────────────────────────────

fn for_each_field_mut(def: &mut Definition, mut f: impl FnMut(&mut PropertyDefinition)) {
    fn visit(fields: &mut [PropertyDefinition], f: &mut dyn FnMut(&mut PropertyDefinition)) {
        for field in fields {
            f(field);
            if let Some(control) = &mut field.control_definition {
                visit(&mut control.fields, f);
            }
        }
    }
    visit(&mut def.fields, &mut f);
    for region in &mut def.regions {
        visit(&mut region.fields, &mut f);
        if let Some(control) = &mut region.control_definition {
            visit(&mut control.fields, &mut f);
        }
    }
    for transition in &mut def.transitions {
        visit(&mut transition.fields, &mut f);
    }
}

/// Fields without a `dms_type` and without a namespace get `prefix + id`.
pub fn set_default_properties(def: &mut Definition, model_prefix: &str) {
    for_each_field_mut(def, |field| {
        if field.dms_type.is_none() && !field.identifier.contains(':') {
            field.dms_type = Some(format!("{model_prefix}{}", field.identifier));
        }
    });
}

/// Stamp `revision` on every nested field, region and transition.
pub fn set_property_revision(def: &mut Definition, revision: i64) {
    for region in &mut def.regions {
        region.revision = revision;
    }
    for transition in &mut def.transitions {
        transition.revision = revision;
    }
    for_each_field_mut(def, |field| field.revision = revision);
}

// ── Validation ────────────────────────────────────────────────

/// Post-merge structural checks. Returns `false` when an error was logged.
pub fn validate_definition(def: &Definition, log: &mut MessageLog) -> bool {
    let key = def.key();
    let before = log.error_count();

    if def.identifier.trim().is_empty() {
        log.error(codes::C_VALIDATE_FAILED, "Definition without identifier")
            .definition = Some(key.clone());
    }

    for field in def.all_fields() {
        if field.identifier.trim().is_empty() {
            continue;
        }
        let display = field.effective_display_type();
        if display.is_visible() && field.data_type.is_none() {
            let code = if field.type_name.is_none() {
                codes::N_TYPE_MISSING
            } else {
                codes::N_TYPE_UNKNOWN
            };
            log.push(
                VerificationMessage::error(
                    code,
                    format!("Field {} has no resolved data type", field.identifier),
                )
                .with_definition(&key),
            );
        }
    }
    log.error_count() == before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataTypeDefinition, RegionDefinition};
    use pretty_assertions::assert_eq;

    struct Types;

    impl DataTypeLookup for Types {
        fn data_type(&self, name: &str) -> Option<DataTypeDefinition> {
            ["text", "int", "long", "double", "date", "boolean"]
                .contains(&name)
                .then(|| DataTypeDefinition::named(name))
        }
    }

    fn ctx() -> NormalizeContext<'static> {
        NormalizeContext {
            types: &Types,
            model_prefix: "emf:",
        }
    }

    fn field(id: &str, ty: &str) -> PropertyDefinition {
        let mut f = PropertyDefinition::new(id);
        f.type_name = Some(ty.to_string());
        f
    }

    fn ids(fields: &[PropertyDefinition]) -> Vec<&str> {
        fields.iter().map(|f| f.identifier.as_str()).collect()
    }

    #[test]
    fn test_normalize_fields_stamps_and_resolves() {
        let mut def = Definition::new("case");
        def.container = Some("t1".into());
        let mut title = field("title", "an..180");
        title.default_value = Some("  hello ".into());
        title.order = Some(2);
        let mut count = field("count", "n..5");
        count.order = Some(1);
        def.fields = vec![title, count];
        let mut region = RegionDefinition::new("details");
        region.fields.push(field("opened", "date"));
        def.regions.push(region);

        let mut log = MessageLog::new();
        normalize_fields(&mut def, &ctx(), &mut log);

        assert!(log.is_empty());
        assert_eq!(ids(&def.fields), vec!["count", "title"]);
        let title = &def.fields[1];
        assert_eq!(title.default_value.as_deref(), Some("hello"));
        assert_eq!(title.data_type.as_ref().unwrap().name, "text");
        assert_eq!(title.max_length, Some(180));
        assert_eq!(title.container.as_deref(), Some("t1"));
        assert_eq!(title.parent_path.as_deref(), Some("case"));
        assert_eq!(def.fields[0].data_type.as_ref().unwrap().name, "int");
        let opened = &def.regions[0].fields[0];
        assert_eq!(opened.parent_path.as_deref(), Some("case/details"));
        assert_eq!(opened.max_length, None);
    }

    #[test]
    fn test_unknown_data_type_is_reported() {
        let mut def = Definition::new("case");
        def.fields = vec![field("at", "time"), field("bad", "zz9")];
        let mut log = MessageLog::new();
        normalize_fields(&mut def, &ctx(), &mut log);
        let found: Vec<&str> = log.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(found, vec![codes::N_TYPE_UNKNOWN, codes::N_TYPE_INVALID]);
        assert!(def.fields.iter().all(|f| f.data_type.is_none()));
    }

    #[test]
    fn test_remove_deleted_elements() {
        let mut def = Definition::new("case");
        let mut gone = field("gone", "an1");
        gone.display_type = Some(DisplayType::Delete);
        def.fields = vec![field("kept", "an1"), gone.clone()];
        let mut region = RegionDefinition::new("r");
        region.fields = vec![gone];
        def.regions.push(region);
        let mut dropped = RegionDefinition::new("old");
        dropped.display_type = Some(DisplayType::Delete);
        def.regions.push(dropped);

        remove_deleted_elements(&mut def);

        assert_eq!(ids(&def.fields), vec!["kept"]);
        assert_eq!(def.regions.len(), 1);
        assert!(def.regions[0].fields.is_empty());
    }

    #[test]
    fn test_synch_merges_system_copy_into_visible() {
        let mut def = Definition::new("case");
        let mut system = field("status", "an10");
        system.display_type = Some(DisplayType::System);
        system.uri = Some("emf:status".into());
        def.fields = vec![system];
        let mut region = RegionDefinition::new("r");
        let mut visible = PropertyDefinition::new("status");
        visible.display_type = Some(DisplayType::ReadOnly);
        region.fields.push(visible);
        def.regions.push(region);
        let mut sys_region = RegionDefinition::new("hidden_stuff");
        sys_region.display_type = Some(DisplayType::System);
        def.regions.push(sys_region);

        let mut log = MessageLog::new();
        synch_region_properties(&mut def, &mut log);

        assert!(log.is_empty());
        assert!(def.fields.is_empty());
        assert_eq!(def.regions.len(), 1);
        let merged = &def.regions[0].fields[0];
        assert_eq!(merged.display_type, Some(DisplayType::ReadOnly));
        assert_eq!(merged.uri.as_deref(), Some("emf:status"));
    }

    #[test]
    fn test_synch_equal_system_copies_keep_first() {
        let mut def = Definition::new("case");
        let mut sys = field("s", "an1");
        sys.display_type = Some(DisplayType::System);
        def.fields = vec![sys.clone()];
        let mut region = RegionDefinition::new("r");
        region.fields.push(sys);
        def.regions.push(region);

        let mut log = MessageLog::new();
        synch_region_properties(&mut def, &mut log);

        assert_eq!(ids(&def.fields), vec!["s"]);
        assert!(def.regions[0].fields.is_empty());
    }

    #[test]
    fn test_synch_duplicate_visible_is_error() {
        let mut def = Definition::new("case");
        def.fields = vec![field("a", "an1")];
        let mut region = RegionDefinition::new("r");
        region.fields.push(field("a", "an1"));
        def.regions.push(region);

        let mut log = MessageLog::new();
        synch_region_properties(&mut def, &mut log);

        assert!(log.has_errors());
        assert_eq!(log.iter().next().unwrap().code, codes::N_FIELD_DUPLICATE);
    }

    #[test]
    fn test_validate_conditions() {
        let mut def = Definition::new("case");
        def.fields = vec![field("title", "an1"), field("status", "an1")];
        def.conditions = vec![
            ConditionDefinition::new("ok", "readonly", "[status]   IN  ('DONE')"),
            ConditionDefinition::new("ghost", "hidden", "[missing] == 1"),
            ConditionDefinition::new("unicode", "hidden", "[title] == 'ü'"),
            ConditionDefinition::new("blank", "hidden", "   "),
        ];

        let mut log = MessageLog::new();
        validate_conditions(&mut def, &mut log);

        assert_eq!(def.conditions.len(), 1);
        assert_eq!(
            def.conditions[0].expression.as_deref(),
            Some("[status] IN ('DONE')")
        );
        assert_eq!(log.len(), 3);
        assert!(!log.has_errors());
    }

    #[test]
    fn test_optimize_state_transitions() {
        let mut def = Definition::new("case");
        let mut conditional = StateTransition::new("OPEN", "close", "CLOSED");
        conditional
            .conditions
            .push(ConditionDefinition::new("c", "enabled", "[status]"));
        def.state_transitions = vec![
            StateTransition::new("OPEN", "close", "ARCHIVED"),
            StateTransition::new("INIT", "create", "OPEN"),
            conditional,
            StateTransition::new("OPEN", "close", "ARCHIVED"),
        ];

        optimize_state_transitions(&mut def);

        let order: Vec<String> = def
            .state_transitions
            .iter()
            .map(|st| st.identity().into_owned())
            .collect();
        assert_eq!(
            order,
            vec![
                "OPEN|close|CLOSED",
                "OPEN|close|ARCHIVED",
                "INIT|create|OPEN"
            ]
        );
    }

    #[test]
    fn test_set_default_properties() {
        let mut def = Definition::new("case");
        let mut ns = PropertyDefinition::new("dcterms:title");
        ns.dms_type = None;
        let mut explicit = PropertyDefinition::new("b");
        explicit.dms_type = Some("custom:b".into());
        def.fields = vec![PropertyDefinition::new("a"), ns, explicit];

        set_default_properties(&mut def, "emf:");

        assert_eq!(def.fields[0].dms_type.as_deref(), Some("emf:a"));
        assert_eq!(def.fields[1].dms_type, None);
        assert_eq!(def.fields[2].dms_type.as_deref(), Some("custom:b"));
    }

    #[test]
    fn test_validate_definition_requires_data_types() {
        let mut def = Definition::new("case");
        def.fields = vec![field("title", "an1")];
        let mut log = MessageLog::new();
        assert!(!validate_definition(&def, &mut log));

        normalize_fields(&mut def, &ctx(), &mut MessageLog::new());
        let mut log = MessageLog::new();
        assert!(validate_definition(&def, &mut log));

        let mut system = PropertyDefinition::new("internal");
        system.display_type = Some(DisplayType::System);
        def.fields.push(system);
        assert!(validate_definition(&def, &mut MessageLog::new()));
    }
}
