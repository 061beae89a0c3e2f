//! Revision history and restore tests
//!
//! Publishes several states, then walks the snapshot file's revisions and
//! restores older ones onto live and freshly loaded hierarchies.

use crate::test_utils::{TestDepot, ROOT};
use streamkeeper_core::{Config, RuleKind, StreamPath};
use streamkeeper_depot::{PublishRequest, ServerCapabilities};

fn publish(fixture: &TestDepot, hierarchy: &streamkeeper_core::StreamHierarchy, note: &str) {
    fixture
        .session
        .publish(hierarchy, &PublishRequest::new(ROOT, note))
        .unwrap();
}

#[test]
fn test_revisions_strictly_descending() {
    let fixture = TestDepot::new("history_order");
    let mut hierarchy = fixture.hierarchy();

    publish(&fixture, &hierarchy, "first");
    hierarchy
        .add_rule(&"//main/dev".into(), RuleKind::Ignore, "out/...")
        .unwrap();
    publish(&fixture, &hierarchy, "second");
    hierarchy.remove_rule(&ROOT.into(), 0).unwrap();
    publish(&fixture, &hierarchy, "third");

    let history = fixture.session.history(&fixture.root()).unwrap();
    let revisions = history.revisions().unwrap();
    assert_eq!(revisions.len(), 3);
    for pair in revisions.windows(2) {
        assert!(pair[0].revision > pair[1].revision);
        assert!(pair[0].timestamp_ms > pair[1].timestamp_ms);
    }
    assert_eq!(revisions[0].description, "third");
    assert_eq!(revisions[2].action, "add");
}

#[test]
fn test_restore_oldest_onto_fresh_hierarchy() {
    let fixture = TestDepot::new("history_restore");
    let original = fixture.hierarchy();
    publish(&fixture, &original, "baseline");

    let mut edited = original.clone();
    edited
        .add_rule(&"//main/release".into(), RuleKind::Ignore, "docs/...")
        .unwrap();
    edited.remove_rule(&ROOT.into(), 0).unwrap();
    publish(&fixture, &edited, "edits");
    fixture
        .session
        .publish(&edited, &PublishRequest::new("//main/release", "release edits"))
        .unwrap();

    // The server now reflects the edits
    let mut fresh = fixture.hierarchy();
    assert!(fresh.get(&ROOT.into()).unwrap().local_rules.is_empty());

    let history = fixture.session.history(&fixture.root()).unwrap();
    let oldest = history.revisions().unwrap().last().unwrap().revision;

    let preview = history
        .preview_restore(&fresh, &"//main/release".into(), oldest)
        .unwrap();
    assert_eq!(preview.removed.len(), 1);
    assert_eq!(preview.removed[0].pattern(), "docs/...");

    let report = history.restore(&mut fresh, oldest).unwrap();
    assert_eq!(report.rules_restored.len(), 3);

    for path in original.paths() {
        assert_eq!(
            fresh.get(&path).unwrap().local_rules,
            original.get(&path).unwrap().local_rules,
            "rules differ for {}",
            path
        );
    }
}

#[test]
fn test_restore_brings_back_parent() {
    let fixture = TestDepot::new("history_parent");
    let mut hierarchy = fixture.hierarchy();
    publish(&fixture, &hierarchy, "baseline");

    let release = StreamPath::new("//main/release");
    hierarchy
        .reparent(&release, Some(&StreamPath::new("//main/dev")))
        .unwrap();
    assert!(hierarchy.is_descendant(&release, &"//main/dev".into()));

    let history = fixture.session.history(&fixture.root()).unwrap();
    let report = history.restore(&mut hierarchy, 1).unwrap();

    assert!(report.skipped_parents.is_empty());
    assert_eq!(
        hierarchy.get(&release).unwrap().parent_path,
        Some(StreamPath::new(ROOT))
    );
}

#[test]
fn test_untracked_parents_left_alone() {
    let mut config = Config::default_config();
    config.history.track_parents = false;
    let fixture =
        TestDepot::with_config("history_no_parents", ServerCapabilities::modern(), config);

    let mut hierarchy = fixture.hierarchy();
    publish(&fixture, &hierarchy, "baseline");
    assert!(fixture.head_snapshot().parents_by_stream().is_none());

    let release = StreamPath::new("//main/release");
    hierarchy
        .reparent(&release, Some(&StreamPath::new("//main/dev")))
        .unwrap();
    let history = fixture.session.history(&fixture.root()).unwrap();
    let report = history.restore(&mut hierarchy, 1).unwrap();

    assert!(report.parents_restored.is_empty());
    assert_eq!(
        hierarchy.get(&release).unwrap().parent_path,
        Some(StreamPath::new("//main/dev"))
    );
}

#[test]
fn test_snapshot_file_is_plain_json() {
    let fixture = TestDepot::new("history_json");
    let hierarchy = fixture.hierarchy();
    publish(&fixture, &hierarchy, "baseline");

    let history = fixture.session.history(&fixture.root()).unwrap();
    let raw = history.read_at(1).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();

    let rules = &value["rulesByStream"]["//main"];
    assert_eq!(rules[0]["kind"], "ignore");
    assert_eq!(rules[0]["pattern"], "tmp/...");
    assert_eq!(value["parentsByStream"]["//main/dev"], ROOT);
}
