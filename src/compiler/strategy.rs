//! Compilation variants: regular top-level definitions and templates.

use defc_core::{merge_template, Definition, DefinitionKind, Mergeable};

pub trait CompileStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Clone container-less definitions into every enabled container.
    fn propagates_base(&self) -> bool;

    /// Merge a compiled parent into `target`.
    fn merge_parent(&self, target: &mut Definition, parent: &Definition);
}

/// Cases, documents, tasks, workflows and generic objects.
pub struct TopLevelStrategy;

impl CompileStrategy for TopLevelStrategy {
    fn name(&self) -> &'static str {
        "top-level"
    }

    fn propagates_base(&self) -> bool {
        true
    }

    fn merge_parent(&self, target: &mut Definition, parent: &Definition) {
        target.merge_from(parent);
    }
}

/// Template bundles: no tenant propagation, three-pass merge.
pub struct TemplateStrategy;

impl CompileStrategy for TemplateStrategy {
    fn name(&self) -> &'static str {
        "template"
    }

    fn propagates_base(&self) -> bool {
        false
    }

    fn merge_parent(&self, target: &mut Definition, parent: &Definition) {
        merge_template(target, parent);
    }
}

static TOP_LEVEL: TopLevelStrategy = TopLevelStrategy;
static TEMPLATE: TemplateStrategy = TemplateStrategy;

pub fn strategy_for(kind: DefinitionKind) -> &'static dyn CompileStrategy {
    match kind {
        DefinitionKind::Template => &TEMPLATE,
        _ => &TOP_LEVEL,
    }
}
