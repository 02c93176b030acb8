//! Definition model: top-level definitions and their nested, identity-keyed
//! collections. Pure value types; `serde` shapes double as the source format
//! (aliases accept the short authoring keys) and the persisted JSON form.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::merge::{merge_lists, merge_optional, replace_if_empty, replace_if_none, Mergeable};

/// Separator between identifier and container in a definition key.
pub const KEY_SEPARATOR: char = '@';

/// Working-map key: `identifier` for base definitions, `identifier@container`
/// for tenant definitions.
pub fn definition_key(identifier: &str, container: Option<&str>) -> String {
    match container {
        Some(c) => format!("{identifier}{KEY_SEPARATOR}{c}"),
        None => identifier.to_string(),
    }
}

// ── Enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    Editable,
    ReadOnly,
    Hidden,
    System,
    Delete,
}

impl DisplayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Editable => "editable",
            Self::ReadOnly => "read_only",
            Self::Hidden => "hidden",
            Self::System => "system",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "editable" => Some(Self::Editable),
            "read_only" | "readonly" => Some(Self::ReadOnly),
            "hidden" => Some(Self::Hidden),
            "system" => Some(Self::System),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Visible to a user in some form (everything except SYSTEM and DELETE).
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Editable | Self::ReadOnly | Self::Hidden)
    }
}

impl std::fmt::Display for DisplayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of top-level definition. Each kind is compiled by its own callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Case,
    Document,
    Task,
    Workflow,
    #[default]
    Generic,
    Template,
}

impl DefinitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Case => "case",
            Self::Document => "document",
            Self::Task => "task",
            Self::Workflow => "workflow",
            Self::Generic => "generic",
            Self::Template => "template",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "case" => Some(Self::Case),
            "document" => Some(Self::Document),
            "task" => Some(Self::Task),
            "workflow" => Some(Self::Workflow),
            "generic" | "object" => Some(Self::Generic),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    /// Template sources may bundle several definitions; all other kinds
    /// carry exactly one per source.
    pub fn allows_multiple_per_source(&self) -> bool {
        matches!(self, Self::Template)
    }
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Data types ────────────────────────────────────────────────

/// Resolved data type, as registered in the dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DataTypeDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

// ── Nested entities ───────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_as: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ConditionDefinition {
    pub fn new(identifier: impl Into<String>, render_as: &str, expression: &str) -> Self {
        Self {
            identifier: identifier.into(),
            render_as: Some(render_as.to_string()),
            expression: Some(expression.to_string()),
        }
    }
}

impl Mergeable for ConditionDefinition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        replace_if_none(&mut self.render_as, &src.render_as);
        replace_if_none(&mut self.expression, &src.expression);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlParam {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Mergeable for ControlParam {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        replace_if_none(&mut self.name, &src.name);
        replace_if_none(&mut self.value, &src.value);
    }
}

/// Control attached to a field or region; its fields merge recursively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<PropertyDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ControlParam>,
}

impl Mergeable for ControlDefinition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        merge_lists(&mut self.fields, &src.fields);
        merge_lists(&mut self.params, &src.params);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(alias = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataTypeDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_type: Option<DisplayType>,
    #[serde(alias = "value", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_valued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codelist: Option<i32>,
    #[serde(alias = "label", skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
    #[serde(alias = "tooltip", skip_serializing_if = "Option::is_none")]
    pub tooltip_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dms_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    pub revision: i64,
    #[serde(alias = "control", skip_serializing_if = "Option::is_none")]
    pub control_definition: Option<ControlDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDefinition>,
}

impl PropertyDefinition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// The name used in condition expressions; falls back to the identifier.
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }

    /// Display type with the authoring default applied.
    pub fn effective_display_type(&self) -> DisplayType {
        self.display_type.unwrap_or(DisplayType::Editable)
    }
}

impl Mergeable for PropertyDefinition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        replace_if_none(&mut self.name, &src.name);
        // resolved data type and length only follow an inherited type declaration
        if self.type_name.is_none() {
            self.type_name.clone_from(&src.type_name);
            replace_if_none(&mut self.data_type, &src.data_type);
            replace_if_none(&mut self.max_length, &src.max_length);
        }
        replace_if_none(&mut self.display_type, &src.display_type);
        replace_if_none(&mut self.default_value, &src.default_value);
        replace_if_none(&mut self.mandatory, &src.mandatory);
        replace_if_none(&mut self.multi_valued, &src.multi_valued);
        replace_if_none(&mut self.order, &src.order);
        replace_if_none(&mut self.codelist, &src.codelist);
        replace_if_none(&mut self.label_id, &src.label_id);
        replace_if_none(&mut self.tooltip_id, &src.tooltip_id);
        replace_if_none(&mut self.uri, &src.uri);
        replace_if_none(&mut self.dms_type, &src.dms_type);
        replace_if_none(&mut self.container, &src.container);
        replace_if_none(&mut self.parent_path, &src.parent_path);
        if self.revision == 0 {
            self.revision = src.revision;
        }
        merge_optional(&mut self.control_definition, &src.control_definition);
        merge_lists(&mut self.conditions, &src.conditions);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_type: Option<DisplayType>,
    #[serde(alias = "label", skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
    pub revision: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<PropertyDefinition>,
    #[serde(alias = "control", skip_serializing_if = "Option::is_none")]
    pub control_definition: Option<ControlDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDefinition>,
}

impl RegionDefinition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }
}

impl Mergeable for RegionDefinition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        replace_if_none(&mut self.order, &src.order);
        replace_if_none(&mut self.display_type, &src.display_type);
        replace_if_none(&mut self.label_id, &src.label_id);
        if self.revision == 0 {
            self.revision = src.revision;
        }
        merge_lists(&mut self.fields, &src.fields);
        merge_optional(&mut self.control_definition, &src.control_definition);
        merge_lists(&mut self.conditions, &src.conditions);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionDefinition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(alias = "label", skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
    #[serde(alias = "event", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_primary_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_secondary_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_transition: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_type: Option<DisplayType>,
    pub revision: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<PropertyDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDefinition>,
}

impl Mergeable for TransitionDefinition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        replace_if_none(&mut self.label_id, &src.label_id);
        replace_if_none(&mut self.event_id, &src.event_id);
        replace_if_none(&mut self.next_primary_state, &src.next_primary_state);
        replace_if_none(&mut self.next_secondary_state, &src.next_secondary_state);
        replace_if_none(&mut self.default_transition, &src.default_transition);
        replace_if_none(&mut self.immediate, &src.immediate);
        replace_if_none(&mut self.purpose, &src.purpose);
        replace_if_none(&mut self.order, &src.order);
        replace_if_none(&mut self.display_type, &src.display_type);
        if self.revision == 0 {
            self.revision = src.revision;
        }
        merge_lists(&mut self.fields, &src.fields);
        merge_lists(&mut self.conditions, &src.conditions);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedChild {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(alias = "type", skip_serializing_if = "Option::is_none")]
    pub child_type: Option<String>,
    #[serde(alias = "default", skip_serializing_if = "Option::is_none")]
    pub default_child: Option<bool>,
}

impl Mergeable for AllowedChild {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.identifier, &src.identifier);
        replace_if_none(&mut self.child_type, &src.child_type);
        replace_if_none(&mut self.default_child, &src.default_child);
    }
}

/// State machine edge. Identity is `from|transition|to`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateTransition {
    #[serde(alias = "from")]
    pub from_state: String,
    #[serde(alias = "transition")]
    pub transition_id: String,
    #[serde(alias = "to")]
    pub to_state: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDefinition>,
}

impl StateTransition {
    pub fn new(from: &str, transition: &str, to: &str) -> Self {
        Self {
            from_state: from.to_string(),
            transition_id: transition.to_string(),
            to_state: to.to_string(),
            conditions: Vec::new(),
        }
    }

    /// Grouping key used by the transition optimizer.
    pub fn group_key(&self) -> String {
        format!("{}|{}", self.from_state, self.transition_id)
    }
}

impl Mergeable for StateTransition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Owned(format!(
            "{}|{}|{}",
            self.from_state, self.transition_id, self.to_state
        ))
    }

    fn merge_from(&mut self, src: &Self) {
        replace_if_empty(&mut self.from_state, &src.from_state);
        replace_if_empty(&mut self.transition_id, &src.transition_id);
        replace_if_empty(&mut self.to_state, &src.to_state);
        merge_lists(&mut self.conditions, &src.conditions);
    }
}

// ── Top-level definition ──────────────────────────────────────

/// A top-level definition: the unit that is compiled, versioned and persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Definition {
    #[serde(alias = "id")]
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub revision: i64,
    pub kind: DefinitionKind,
    #[serde(alias = "parent", skip_serializing_if = "Option::is_none")]
    pub parent_definition_id: Option<String>,
    #[serde(alias = "reference", skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(alias = "abstract", skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<PropertyDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_children: Vec<AllowedChild>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state_transitions: Vec<StateTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dms_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
}

impl Definition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        definition_key(&self.identifier, self.container.as_deref())
    }

    /// Base definitions carry no container and are cloned into tenants.
    pub fn is_base(&self) -> bool {
        self.container.is_none()
    }

    /// Key of the parent in the same container, if any.
    pub fn parent_key(&self) -> Option<String> {
        self.parent_definition_id
            .as_deref()
            .map(|p| definition_key(p, self.container.as_deref()))
    }

    /// Key of the referenced definition in the same container, if any.
    pub fn reference_key(&self) -> Option<String> {
        self.reference_id
            .as_deref()
            .map(|r| definition_key(r, self.container.as_deref()))
    }

    /// Provenance for messages: source location, then DMS id.
    pub fn provenance(&self) -> Option<&str> {
        self.source_location.as_deref().or(self.dms_id.as_deref())
    }

    /// Root fields followed by region fields, in declaration order.
    pub fn all_fields(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.fields
            .iter()
            .chain(self.regions.iter().flat_map(|r| r.fields.iter()))
    }

    pub fn find_field(&self, identifier: &str) -> Option<&PropertyDefinition> {
        self.all_fields().find(|f| f.identifier == identifier)
    }
}

impl Mergeable for Definition {
    fn identity(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.identifier)
    }

    fn merge_from(&mut self, parent: &Self) {
        crate::merge::merge_definition(self, parent);
    }
}
