//! End-to-end compile runs over in-memory sources.
//!
//! Run: cargo test --test compile_pipeline

mod helpers;

use std::sync::Arc;

use defc::adapters::StandardCallback;
use defc::{CompileError, CompilerConfig, TenantPolicy};
use defc_core::{codes, Definition, DefinitionKind, RevisionDecision, UnresolvedReason};
use helpers::{field_ids, keys, message_codes, test_config, FailingWrites, Harness};
use pretty_assertions::assert_eq;

const CASE: DefinitionKind = DefinitionKind::Case;

const BASE: &str = r#"
definition:
  id: base
  purpose: root
  fields:
    - id: title
      type: an..50
      mandatory: true
    - id: amount
      type: n..12
"#;

const CHILD: &str = r#"
definition:
  id: child
  parent: base
  fields:
    - id: note
      type: an..20
"#;

const GRANDCHILD: &str = r#"
definition:
  id: grandchild
  parent: child
  fields:
    - id: title
      mandatory: false
"#;

fn position(keys: &[String], key: &str) -> usize {
    keys.iter()
        .position(|k| k == key)
        .unwrap_or_else(|| panic!("{key} not compiled, got {keys:?}"))
}

fn standalone(id: &str, note_type: &str) -> String {
    format!("definition:\n  id: {id}\n  fields:\n    - id: note\n      type: {note_type}\n")
}

// ── Sorting and inheritance ───────────────────────────────────

#[tokio::test]
async fn test_parents_compile_before_children() {
    let h = Harness::new();
    h.add(CASE, "t1/grandchild.yaml", Some("t1"), GRANDCHILD).await;
    h.add(CASE, "t1/child.yaml", Some("t1"), CHILD).await;
    h.add(CASE, "t1/base.yaml", Some("t1"), BASE).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    let keys = keys(&outcome);
    assert_eq!(keys.len(), 3);
    assert!(position(&keys, "base@t1") < position(&keys, "child@t1"));
    assert!(position(&keys, "child@t1") < position(&keys, "grandchild@t1"));
    assert!(outcome.errors().next().is_none(), "{:?}", outcome.messages);
}

#[tokio::test]
async fn test_child_inherits_and_overrides_parent_fields() {
    let h = Harness::new();
    h.add(CASE, "t1/base.yaml", Some("t1"), BASE).await;
    h.add(CASE, "t1/child.yaml", Some("t1"), CHILD).await;
    h.add(CASE, "t1/grandchild.yaml", Some("t1"), GRANDCHILD).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    let child = outcome.definition("child@t1").unwrap();
    assert_eq!(field_ids(child), vec!["note", "title", "amount"]);
    assert_eq!(child.purpose.as_deref(), Some("root"));
    let title = child.find_field("title").unwrap();
    assert_eq!(title.data_type.as_ref().map(|t| t.name.as_str()), Some("text"));
    assert_eq!(title.max_length, Some(50));
    assert_eq!(title.parent_path.as_deref(), Some("child"));
    assert_eq!(title.dms_type.as_deref(), Some("emf:title"));
    let amount = child.find_field("amount").unwrap();
    assert_eq!(amount.data_type.as_ref().map(|t| t.name.as_str()), Some("long"));

    let grandchild = outcome.definition("grandchild@t1").unwrap();
    assert_eq!(field_ids(grandchild), vec!["title", "note", "amount"]);
    let title = grandchild.find_field("title").unwrap();
    assert_eq!(title.mandatory, Some(false));
    assert_eq!(title.type_name.as_deref(), Some("an..50"));

    // parent is never mutated by its children
    let base = outcome.definition("base@t1").unwrap();
    assert_eq!(base.find_field("title").unwrap().mandatory, Some(true));
    assert_eq!(field_ids(base), vec!["title", "amount"]);
}

#[tokio::test]
async fn test_retyped_field_drops_inherited_length() {
    let h = Harness::new();
    h.add(
        CASE,
        "t1/p.yaml",
        Some("t1"),
        "definition:\n  id: p\n  fields:\n    - id: due\n      type: an..50\n    - id: code\n      type: an..50\n",
    )
    .await;
    h.add(
        CASE,
        "t1/c.yaml",
        Some("t1"),
        "definition:\n  id: c\n  parent: p\n  fields:\n    - id: due\n      type: date\n    - id: code\n      type: an10\n",
    )
    .await;

    let outcome = h.compile(CASE, false).await.unwrap();

    let child = outcome.definition("c@t1").unwrap();
    let due = child.find_field("due").unwrap();
    assert_eq!(due.type_name.as_deref(), Some("date"));
    assert_eq!(due.data_type.as_ref().map(|t| t.name.as_str()), Some("date"));
    assert_eq!(due.max_length, None);
    assert_eq!(child.find_field("code").unwrap().max_length, Some(10));

    let parent = outcome.definition("p@t1").unwrap();
    assert_eq!(parent.find_field("due").unwrap().max_length, Some(50));
}

#[tokio::test]
async fn test_reference_fields_are_appended() {
    let h = Harness::new();
    h.add(
        CASE,
        "t1/form.yaml",
        Some("t1"),
        "definition:\n  id: form\n  reference: shared\n  fields:\n    - id: own\n      type: boolean\n",
    )
    .await;
    h.add(
        CASE,
        "t1/shared.yaml",
        Some("t1"),
        "definition:\n  id: shared\n  fields:\n    - id: s1\n      type: date\n",
    )
    .await;

    let outcome = h.compile(CASE, false).await.unwrap();

    let form = outcome.definition("form@t1").unwrap();
    assert_eq!(field_ids(form), vec!["own", "s1"]);
}

// ── Unresolved chains ─────────────────────────────────────────

#[tokio::test]
async fn test_missing_parent_reported_with_suggestion() {
    let h = Harness::new();
    h.add(CASE, "t1/base.yaml", Some("t1"), BASE).await;
    h.add(
        CASE,
        "t1/orphan.yaml",
        Some("t1"),
        "definition:\n  id: orphan\n  parent: bse\n",
    )
    .await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["base@t1"]);
    assert_eq!(
        outcome.unresolved.get("orphan@t1"),
        Some(&UnresolvedReason::MissingParent("bse".into()))
    );
    let message = outcome
        .messages
        .iter()
        .find(|m| m.code == codes::C_REF_UNRESOLVED_PARENT)
        .unwrap();
    assert!(message.message.contains("did you mean \"base\""), "{}", message.message);
}

#[tokio::test]
async fn test_cycle_excludes_whole_chain() {
    let h = Harness::new();
    h.add(CASE, "t1/a.yaml", Some("t1"), "definition:\n  id: a\n  parent: b\n").await;
    h.add(CASE, "t1/b.yaml", Some("t1"), "definition:\n  id: b\n  parent: a\n").await;
    h.add(CASE, "t1/c.yaml", Some("t1"), "definition:\n  id: c\n  parent: a\n").await;
    h.add(CASE, "t1/ok.yaml", Some("t1"), &standalone("ok", "n5")).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["ok@t1"]);
    assert!(matches!(outcome.unresolved.get("a@t1"), Some(UnresolvedReason::Cycle(_))));
    assert!(outcome.unresolved.contains_key("b@t1"));
    assert!(outcome.unresolved.contains_key("c@t1"));
    assert!(message_codes(&outcome).contains(&codes::C_REF_CYCLE));
}

#[tokio::test]
async fn test_missing_reference_is_unresolved() {
    let h = Harness::new();
    h.add(
        CASE,
        "t1/form.yaml",
        Some("t1"),
        "definition:\n  id: form\n  reference: nowhere\n",
    )
    .await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert!(outcome.definitions.is_empty());
    assert_eq!(
        outcome.unresolved.get("form@t1"),
        Some(&UnresolvedReason::MissingReference("nowhere".into()))
    );
    assert!(message_codes(&outcome).contains(&codes::C_REF_UNRESOLVED_REFERENCE));
}

// ── Validation cascade ────────────────────────────────────────

#[tokio::test]
async fn test_invalid_root_excludes_descendants() {
    let h = Harness::new();
    h.add(
        CASE,
        "t1/broken.yaml",
        Some("t1"),
        "definition:\n  id: broken\n  fields:\n    - id: untyped\n",
    )
    .await;
    h.add(CASE, "t1/heir.yaml", Some("t1"), "definition:\n  id: heir\n  parent: broken\n").await;
    h.add(CASE, "t1/fine.yaml", Some("t1"), &standalone("fine", "an10")).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["fine@t1"]);
    let found = message_codes(&outcome);
    assert!(found.contains(&codes::N_TYPE_MISSING), "{found:?}");
    assert!(found.contains(&codes::C_VALIDATE_DRY_RUN_FAILED), "{found:?}");
    let cascade = outcome
        .messages
        .iter()
        .find(|m| m.code == codes::C_REF_PARENT_FAILED)
        .unwrap();
    assert_eq!(cascade.definition.as_deref(), Some("heir@t1"));
}

#[tokio::test]
async fn test_invalid_child_excludes_grandchildren() {
    let h = Harness::new();
    h.add(CASE, "t1/base.yaml", Some("t1"), BASE).await;
    h.add(
        CASE,
        "t1/child.yaml",
        Some("t1"),
        "definition:\n  id: child\n  parent: base\n  fields:\n    - id: weird\n      type: blob\n",
    )
    .await;
    h.add(CASE, "t1/grandchild.yaml", Some("t1"), GRANDCHILD).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["base@t1"]);
    let found = message_codes(&outcome);
    assert!(found.contains(&codes::N_TYPE_INVALID), "{found:?}");
    assert!(found.contains(&codes::C_VALIDATE_FAILED), "{found:?}");
    assert!(found.contains(&codes::C_REF_PARENT_FAILED), "{found:?}");
}

// ── Grouping ──────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicates_excluded_with_both_sources_named() {
    let h = Harness::new();
    h.add(CASE, "t1/one.yaml", Some("t1"), &standalone("dup", "n5")).await;
    h.add(CASE, "t1/two.yaml", Some("t1"), &standalone("dup", "n..12")).await;
    h.add(CASE, "t2/three.yaml", Some("t2"), &standalone("dup", "n5")).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["dup@t2"]);
    let duplicates: Vec<_> = outcome
        .messages
        .iter()
        .filter(|m| m.code == codes::C_DUP_IDENTIFIER)
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert!(duplicates[0].message.contains("t1/one.yaml"));
    assert!(duplicates[0].message.contains("t1/two.yaml"));
}

#[tokio::test]
async fn test_base_definitions_propagate_into_containers() {
    let h = Harness::new();
    h.add(CASE, "base.yaml", None, BASE).await;
    h.add(
        CASE,
        "t1/base.yaml",
        Some("t1"),
        "definition:\n  id: base\n  purpose: local\n",
    )
    .await;
    h.add(CASE, "t1/child.yaml", Some("t1"), CHILD).await;
    h.add(CASE, "t2/child.yaml", Some("t2"), CHILD).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    let mut compiled = keys(&outcome);
    compiled.sort();
    assert_eq!(compiled, vec!["base@t1", "base@t2", "child@t1", "child@t2"]);

    let local = outcome.definition("base@t1").unwrap();
    assert_eq!(local.purpose.as_deref(), Some("local"));
    assert!(local.fields.is_empty());
    let copied = outcome.definition("base@t2").unwrap();
    assert_eq!(copied.source_location.as_deref(), Some("base.yaml"));
    assert_eq!(field_ids(outcome.definition("child@t2").unwrap()), vec!["note", "title", "amount"]);
    assert_eq!(field_ids(outcome.definition("child@t1").unwrap()), vec!["note"]);
}

#[tokio::test]
async fn test_enabled_containers_limit_propagation() {
    let h = Harness::with_config(CompilerConfig {
        enabled_containers: vec!["t3".into()],
        ..test_config()
    });
    h.add(CASE, "base.yaml", None, BASE).await;
    h.add(CASE, "t1/child.yaml", Some("t1"), CHILD).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert!(outcome.definition("base@t3").is_some());
    assert!(outcome.definition("base@t1").is_none());
    assert!(outcome.unresolved.contains_key("child@t1"));
}

#[tokio::test]
async fn test_templates_stay_in_their_container() {
    let h = Harness::new();
    h.add(
        DefinitionKind::Template,
        "bundle.yaml",
        None,
        r#"
definitions:
  - id: tbase
    fields:
      - id: a
        type: an..40
        order: 2
      - id: b
        type: n3
        order: 1
  - id: tchild
    parent: tbase
    fields:
      - id: c
        type: date
"#,
    )
    .await;
    h.add(
        DefinitionKind::Template,
        "t1/local.yaml",
        Some("t1"),
        "definitions:\n  - id: stray\n    parent: tbase\n",
    )
    .await;

    let outcome = h.compile(DefinitionKind::Template, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["tbase", "tchild"]);
    assert_eq!(field_ids(outcome.definition("tchild").unwrap()), vec!["b", "a", "c"]);
    assert!(outcome.unresolved.contains_key("stray@t1"));
    assert!(outcome.definitions.iter().all(|d| d.kind == DefinitionKind::Template));
}

// ── Fetch failures ────────────────────────────────────────────

#[tokio::test]
async fn test_bad_sources_do_not_abort_the_batch() {
    let h = Harness::new();
    h.add(CASE, "t1/syntax.yaml", Some("t1"), "definition: [unclosed").await;
    h.add(CASE, "t1/noid.yaml", Some("t1"), "definition:\n  purpose: nameless\n").await;
    h.add(CASE, "t1/schema.yaml", Some("t1"), "definition:\n  id: x\nbogus: 1\n").await;
    h.add(CASE, "t1/two.yaml", Some("t1"), "definitions:\n  - id: p\n  - id: q\n").await;
    h.add(CASE, "t1/ok.yaml", Some("t1"), &standalone("ok", "n5")).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["ok@t1"]);
    let found = message_codes(&outcome);
    assert!(found.contains(&codes::F_PARSE_SYNTAX), "{found:?}");
    assert!(found.contains(&codes::F_PARSE_MISSING_IDENTIFIER), "{found:?}");
    assert!(found.contains(&codes::F_SCHEMA_INVALID), "{found:?}");
    let missing_id = outcome
        .messages
        .iter()
        .find(|m| m.code == codes::F_PARSE_MISSING_IDENTIFIER)
        .unwrap();
    assert_eq!(missing_id.source.as_deref(), Some("t1/noid.yaml"));
}

#[tokio::test]
async fn test_tenant_policy_rejects_foreign_containers() {
    let h = Harness::with_config(CompilerConfig {
        tenant_policy: TenantPolicy::DefaultContainerOnly,
        default_container: Some("t1".into()),
        ..test_config()
    });
    h.add(CASE, "t1/mine.yaml", Some("t1"), &standalone("mine", "n5")).await;
    h.add(CASE, "t2/theirs.yaml", Some("t2"), &standalone("theirs", "n5")).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(keys(&outcome), vec!["mine@t1"]);
    assert!(message_codes(&outcome).contains(&codes::F_SOURCE_REJECTED));
}

// ── Revisions and persistence ─────────────────────────────────

#[tokio::test]
async fn test_recompile_of_unchanged_sources_is_skipped() {
    let h = Harness::new();
    h.add(CASE, "t1/base.yaml", Some("t1"), BASE).await;
    h.add(CASE, "t1/child.yaml", Some("t1"), CHILD).await;

    let first = h.compile(CASE, true).await.unwrap();
    assert_eq!(first.persisted, vec!["base@t1", "child@t1"]);
    assert!(first
        .decisions
        .values()
        .all(|d| *d == RevisionDecision::PersistAsRevision(1)));

    let second = h.compile(CASE, true).await.unwrap();
    assert!(second.persisted.is_empty());
    assert_eq!(second.skipped, vec!["base@t1", "child@t1"]);
    assert!(second.decisions.values().all(RevisionDecision::is_skip));
    let child = second.definition("child@t1").unwrap();
    assert_eq!(child.revision, 1);
    assert!(child.all_fields().all(|f| f.revision == 1));
}

#[tokio::test]
async fn test_changed_definition_bumps_only_its_revision() {
    let h = Harness::new();
    h.add(CASE, "t1/a.yaml", Some("t1"), &standalone("a", "n5")).await;
    h.add(CASE, "t1/b.yaml", Some("t1"), &standalone("b", "n5")).await;
    h.compile(CASE, true).await.unwrap();

    h.add(CASE, "t1/b.yaml", Some("t1"), &standalone("b", "n..12")).await;
    let outcome = h.compile(CASE, true).await.unwrap();

    assert_eq!(outcome.definition("a@t1").unwrap().revision, 1);
    assert_eq!(outcome.definition("b@t1").unwrap().revision, 2);
    assert_eq!(outcome.skipped, vec!["a@t1"]);
    assert_eq!(outcome.persisted, vec!["b@t1"]);
    assert!(message_codes(&outcome).contains(&codes::P_REVISION_BUMPED));
    assert_eq!(h.dictionary.get("b@t1").await.unwrap().revision, 2);
    assert_eq!(h.dictionary.properties("b@t1").await.unwrap()[0].revision, 2);
}

#[tokio::test]
async fn test_dry_compile_decides_without_writing() {
    let h = Harness::new();
    h.add(CASE, "t1/a.yaml", Some("t1"), &standalone("a", "n5")).await;

    let outcome = h.compile(CASE, false).await.unwrap();

    assert_eq!(
        outcome.decisions.get("a@t1"),
        Some(&RevisionDecision::PersistAsRevision(1))
    );
    assert!(outcome.persisted.is_empty());
    assert_eq!(h.dictionary.len().await, 0);
}

#[tokio::test]
async fn test_write_failure_aborts_the_batch() {
    let h = Harness::new();
    for id in ["a", "b", "c"] {
        h.add(CASE, &format!("t1/{id}.yaml"), Some("t1"), &standalone(id, "n5")).await;
    }
    let callback = Arc::new(FailingWrites::new(
        StandardCallback::new(CASE, Arc::clone(&h.dictionary)),
        &["b@t1"],
    ));

    let err = h.compile_with(callback, true).await.unwrap_err();

    match err {
        CompileError::Persistence { definition, .. } => assert_eq!(definition, "b@t1"),
        other => panic!("expected persistence failure, got {other}"),
    }
    assert!(h.dictionary.get("a@t1").await.is_some());
    assert!(h.dictionary.get("c@t1").await.is_none());
    // properties go first, so the failed definition's are already written
    assert!(h.dictionary.properties("b@t1").await.is_some());
    assert!(h.dictionary.get("b@t1").await.is_none());
    assert!(h.dictionary.properties("c@t1").await.is_none());
    assert!(!h.ctx.is_running());
}

#[tokio::test]
async fn test_failed_warm_up_is_only_a_warning() {
    let h = Harness::new();
    h.add(CASE, "t1/a.yaml", Some("t1"), &standalone("a", "n5")).await;
    let callback = Arc::new(FailingWrites::new(
        StandardCallback::new(CASE, Arc::clone(&h.dictionary)),
        &[],
    ));

    let outcome = h.compile_with(callback, true).await.unwrap();

    assert_eq!(keys(&outcome), vec!["a@t1"]);
    assert!(message_codes(&outcome).contains(&codes::C_CACHE_WARM_UP_FAILED));
    assert!(outcome.errors().next().is_none());
}

// ── Side outputs ──────────────────────────────────────────────

#[tokio::test]
async fn test_labels_and_filters_saved_in_background() {
    let h = Harness::new();
    h.add(
        CASE,
        "t1/a.yaml",
        Some("t1"),
        r#"
definition:
  id: a
labels:
  - id: a.title
    labels:
      en: Title
      de: Titel
  - id: a.empty
filters:
  - id: only-open
    values: [open]
"#,
    )
    .await;

    let outcome = h.compile(CASE, false).await.unwrap();
    assert_eq!(outcome.background.len(), 2);
    outcome.background.join().await;

    let labels = h.store.labels().await;
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].identifier, "a.title");
    assert_eq!(labels[0].source.as_deref(), Some("t1/a.yaml"));
    assert_eq!(h.store.filters().await[0].values, vec!["open"]);
}

#[tokio::test]
async fn test_undeclared_definitions_become_removal_candidates() {
    let h = Harness::new();
    h.add(CASE, "t1/a.yaml", Some("t1"), &standalone("a", "n5")).await;
    for id in ["gone", "used"] {
        let mut old = Definition::new(id);
        old.container = Some("t1".into());
        old.kind = CASE;
        old.revision = 4;
        h.dictionary.store(old).await;
    }
    let callback = Arc::new(
        StandardCallback::new(CASE, Arc::clone(&h.dictionary)).with_live_instance("used@t1"),
    );

    let outcome = h.compile_with(callback, false).await.unwrap();

    assert_eq!(outcome.removal_candidates, vec!["gone@t1"]);
    assert!(message_codes(&outcome).contains(&codes::P_GC_CANDIDATE));

    let report = outcome.report();
    assert_eq!(report.compiled.len(), 1);
    assert_eq!(report.compiled[0].key, "a@t1");
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["removal_candidates"][0], "gone@t1");
}
