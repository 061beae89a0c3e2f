//! Publish protocol tests
//!
//! Each test drives `DepotSession::publish` against a `MemoryDepot` and
//! checks which server calls were made, how the snapshot file was opened,
//! and what is left behind when a stage fails.

use crate::test_utils::{TestDepot, ROOT};
use streamkeeper_core::{CaptureOptions, Error, RuleKind, Snapshot, StreamPath};
use streamkeeper_depot::{
    DepotOp, DepotServer, FileAction, OpenMode, OpenStep, PathEntry, PathKind, PublishRequest,
    PublishStage, PublishStatus,
};

fn request() -> PublishRequest {
    PublishRequest::new(ROOT, "Update stream rules")
}

#[test]
fn test_first_publish_adds_snapshot_file() {
    let fixture = TestDepot::new("first_publish");
    let mut hierarchy = fixture.hierarchy();
    hierarchy
        .add_rule(&"//main/dev".into(), RuleKind::Ignore, "build/...")
        .unwrap();
    fixture.depot.clear_calls();

    let outcome = fixture
        .session
        .publish(&hierarchy, &PublishRequest::new("//main/dev", "Ignore build output"))
        .unwrap();

    assert_eq!(outcome.open_mode, OpenMode::Added);
    assert!(matches!(outcome.status, PublishStatus::Submitted { .. }));
    assert_eq!(outcome.snapshot_path, "//main/.streamkeeper/streamkeeper-history.json");
    assert!(!fixture.depot.called(DepotOp::Sync));
    assert!(!fixture.depot.called(DepotOp::OpenForEdit));
    assert!(fixture.depot.pending_changelists().is_empty());

    // Remote rules follow the edit
    let spec = fixture.depot.stream_spec(&"//main/dev".into()).unwrap();
    assert_eq!(spec.ignored, vec!["build/...".to_string()]);

    // Head content is the captured hierarchy
    let expected = Snapshot::capture(&hierarchy, CaptureOptions::default());
    assert_eq!(fixture.head_snapshot(), expected);
    assert_eq!(outcome.snapshot_digest, expected.digest());
    assert_eq!(fixture.depot.head_revision(&outcome.snapshot_path), Some(1));
}

#[test]
fn test_stage_order() {
    let fixture = TestDepot::new("stage_order");
    let hierarchy = fixture.hierarchy();
    fixture.depot.clear_calls();

    fixture.session.publish(&hierarchy, &request()).unwrap();

    let calls = fixture.depot.calls();
    let position = |op| calls.iter().position(|c| *c == op).unwrap();
    assert!(position(DepotOp::SaveStreamSpec) < position(DepotOp::CreateChangelist));
    assert!(position(DepotOp::CreateChangelist) < position(DepotOp::OpenForAdd));
    assert!(position(DepotOp::OpenForAdd) < position(DepotOp::ListOpenedFiles));
    assert!(position(DepotOp::ListOpenedFiles) < position(DepotOp::Submit));
}

#[test]
fn test_existing_file_is_edited() {
    let fixture = TestDepot::new("edit_path");
    let mut hierarchy = fixture.hierarchy();
    fixture.session.publish(&hierarchy, &request()).unwrap();

    let remap = RuleKind::Remap {
        target: "shared/lib/...".to_string(),
    };
    hierarchy.add_rule(&ROOT.into(), remap, "lib/...").unwrap();
    fixture.depot.clear_calls();
    let outcome = fixture.session.publish(&hierarchy, &request()).unwrap();

    assert_eq!(outcome.open_mode, OpenMode::Edited);
    assert!(fixture.depot.called(DepotOp::Sync));
    assert!(!fixture.depot.called(DepotOp::OpenForAdd));
    assert_eq!(fixture.depot.head_revision(&outcome.snapshot_path), Some(2));

    let spec = fixture.depot.stream_spec(&ROOT.into()).unwrap();
    assert_eq!(spec.remapped.len(), 1);
    assert_eq!(spec.remapped[0].to, "shared/lib/...");
}

#[test]
fn test_leftover_open_file_is_reopened() {
    let fixture = TestDepot::new("reopen_path");
    let hierarchy = fixture.hierarchy();
    fixture.depot.set_next_changelist(7);
    let leftover = fixture
        .depot
        .leave_opened(&fixture.snapshot_path(), FileAction::Add);
    assert_eq!(leftover, 7);
    fixture.depot.clear_calls();

    let outcome = fixture.session.publish(&hierarchy, &request()).unwrap();

    assert_eq!(outcome.open_mode, OpenMode::Reopened { from: 7 });
    assert!(fixture.depot.called(DepotOp::Reopen));
    assert!(!fixture.depot.called(DepotOp::OpenForAdd));
    assert!(!fixture.depot.called(DepotOp::OpenForEdit));
    // The emptied leftover stays pending; the publish changelist is gone
    assert_eq!(fixture.depot.pending_changelists(), vec![leftover]);
}

#[test]
fn test_reopen_retried_once() {
    let fixture = TestDepot::new("reopen_retry");
    let hierarchy = fixture.hierarchy();
    let leftover = fixture
        .depot
        .leave_opened(&fixture.snapshot_path(), FileAction::Add);
    fixture.depot.fail_next(DepotOp::Reopen);

    let outcome = fixture.session.publish(&hierarchy, &request()).unwrap();

    assert_eq!(outcome.open_mode, OpenMode::Reopened { from: leftover });
    let reopens = fixture
        .depot
        .calls()
        .into_iter()
        .filter(|op| *op == DepotOp::Reopen)
        .count();
    assert_eq!(reopens, 2);
}

#[test]
fn test_pending_publish_then_reopen() {
    let fixture = TestDepot::new("pending_then_reopen");
    let hierarchy = fixture.hierarchy();

    let first = fixture
        .session
        .publish(&hierarchy, &request().pending())
        .unwrap();
    let PublishStatus::Pending { changelist } = first.status else {
        panic!("expected a pending changelist, got {:?}", first.status);
    };
    assert_eq!(fixture.depot.head_revision(&first.snapshot_path), None);

    let second = fixture.session.publish(&hierarchy, &request()).unwrap();
    assert_eq!(second.open_mode, OpenMode::Reopened { from: changelist });
    assert_eq!(fixture.depot.head_revision(&second.snapshot_path), Some(1));
}

#[test]
fn test_failed_edit_falls_through_to_add() {
    let fixture = TestDepot::new("edit_fallthrough");
    let hierarchy = fixture.hierarchy();
    fixture.session.publish(&hierarchy, &request()).unwrap();

    fixture.depot.fail_next(DepotOp::OpenForEdit);
    fixture.depot.clear_calls();
    let err = fixture.session.publish(&hierarchy, &request()).unwrap_err();

    // Add was attempted and rejected because the file exists at head
    assert!(fixture.depot.called(DepotOp::OpenForAdd));
    assert_eq!(err.stage, PublishStage::OpenForWrite(OpenStep::OpenForAdd));
    assert!(matches!(err.source, Error::RemoteWriteConflict(_)));
    let pending = err.pending_changelist.unwrap();
    assert!(fixture.depot.pending_changelists().contains(&pending));
}

#[test]
fn test_verification_failure_reports_pending_changelist() {
    let fixture = TestDepot::new("verification");
    let hierarchy = fixture.hierarchy();
    fixture.depot.ignore_next(DepotOp::OpenForAdd);

    let err = fixture.session.publish(&hierarchy, &request()).unwrap_err();

    assert_eq!(err.stage, PublishStage::OpenForWrite(OpenStep::Verification));
    assert!(matches!(err.source, Error::RemoteWriteConflict(_)));
    let pending = err.pending_changelist.unwrap();
    assert_eq!(fixture.depot.pending_changelists(), vec![pending]);
    assert!(!fixture.depot.called(DepotOp::Submit));

    let message = err.to_string();
    assert!(message.contains("verification step"));
    assert!(message.contains(&format!("pending changelist {}", pending)));
}

#[test]
fn test_submit_failure_leaves_changelist_pending() {
    let fixture = TestDepot::new("submit_failure");
    let hierarchy = fixture.hierarchy();
    fixture.depot.fail_next(DepotOp::Submit);

    let err = fixture.session.publish(&hierarchy, &request()).unwrap_err();

    assert_eq!(err.stage, PublishStage::Commit);
    let pending = err.pending_changelist.unwrap();
    let opened = fixture.depot.list_opened_files(pending).unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].depot_path, fixture.snapshot_path());
}

#[test]
fn test_rule_update_failure_creates_nothing() {
    let fixture = TestDepot::new("rules_failure");
    let hierarchy = fixture.hierarchy();
    fixture.depot.fail_next(DepotOp::SaveStreamSpec);
    fixture.depot.clear_calls();

    let err = fixture.session.publish(&hierarchy, &request()).unwrap_err();

    assert_eq!(err.stage, PublishStage::UpdateRemoteRules);
    assert_eq!(err.pending_changelist, None);
    assert!(!fixture.depot.called(DepotOp::CreateChangelist));
    assert!(err.to_string().ends_with("no pending changelist left"));
}

#[test]
fn test_changelist_creation_failure() {
    let fixture = TestDepot::new("changelist_failure");
    let hierarchy = fixture.hierarchy();
    fixture.depot.fail_next(DepotOp::CreateChangelist);

    let err = fixture.session.publish(&hierarchy, &request()).unwrap_err();

    assert_eq!(err.stage, PublishStage::OpenForWrite(OpenStep::CreateChangelist));
    assert_eq!(err.pending_changelist, None);
    assert!(fixture.depot.pending_changelists().is_empty());
}

#[test]
fn test_workspace_path_fallback() {
    let fixture = TestDepot::new("path_fallback");
    let hierarchy = fixture.hierarchy();
    fixture.depot.fail_next(DepotOp::ResolveWorkspacePath);
    fixture.depot.clear_calls();

    let outcome = fixture.session.publish(&hierarchy, &request()).unwrap();

    assert!(fixture.depot.called(DepotOp::Workspace));
    assert_eq!(
        outcome.local_path,
        fixture
            .workspace_root
            .join("main")
            .join(".streamkeeper")
            .join("streamkeeper-history.json")
    );
    assert!(outcome.local_path.exists());
}

#[test]
fn test_legacy_server_uses_exclude_paths() {
    let fixture = TestDepot::legacy("legacy");
    let mut hierarchy = fixture.hierarchy();
    // Legacy decode reads excludes, so the sample `ignored` field is invisible
    assert!(hierarchy.get(&ROOT.into()).unwrap().local_rules.is_empty());

    hierarchy
        .add_rule(&ROOT.into(), RuleKind::Ignore, "obj/...")
        .unwrap();
    fixture.session.publish(&hierarchy, &request()).unwrap();

    let spec = fixture.depot.stream_spec(&ROOT.into()).unwrap();
    assert!(spec.paths.contains(&PathEntry::new(PathKind::Exclude, "obj/...")));

    let reloaded = fixture.hierarchy();
    let rules = &reloaded.get(&ROOT.into()).unwrap().local_rules;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].pattern(), "obj/...");
}

#[test]
fn test_preflight_failures() {
    let fixture = TestDepot::new("preflight");
    let hierarchy = fixture.hierarchy();

    let err = fixture
        .session
        .publish(&hierarchy, &PublishRequest::new("//main/unknown", "x"))
        .unwrap_err();
    assert_eq!(err.stage, PublishStage::Preflight);
    assert!(matches!(err.source, Error::StreamNotFound(_)));

    fixture.depot.disconnect().unwrap();
    let err = fixture.session.publish(&hierarchy, &request()).unwrap_err();
    assert_eq!(err.stage, PublishStage::Preflight);
    assert!(matches!(err.source, Error::NotConnected));
    assert!(!fixture.session.is_publishing(&StreamPath::new(ROOT)));
}
