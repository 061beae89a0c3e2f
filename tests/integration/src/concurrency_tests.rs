//! Concurrent publish tests
//!
//! `GatedDepot` pauses the first stream-spec save until the test releases
//! it, so a second publish can be attempted while the first is provably
//! still in flight.

use crate::test_utils::{init_tracing, sample_streams, temp_workspace, ROOT};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use streamkeeper_core::{ChangelistId, Config, Error, Result, StreamPath, StreamRecord};
use streamkeeper_depot::{
    spawn_publish, DepotServer, DepotSession, MemoryDepot, OpenedFile, PublishRequest,
    PublishStage, PublishStatus, RevisionInfo, ServerCapabilities, StreamSpec, WorkspaceInfo,
};

struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Delegates to `MemoryDepot`, blocking once inside `save_stream_spec`.
struct GatedDepot {
    inner: MemoryDepot,
    gate: Mutex<Option<Gate>>,
}

impl DepotServer for GatedDepot {
    fn connect(&self) -> Result<()> {
        self.inner.connect()
    }
    fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
    fn capabilities(&self) -> Result<ServerCapabilities> {
        self.inner.capabilities()
    }
    fn workspace(&self) -> Result<WorkspaceInfo> {
        self.inner.workspace()
    }
    fn fetch_stream_record(&self, path: &StreamPath) -> Result<StreamRecord> {
        self.inner.fetch_stream_record(path)
    }
    fn fetch_all_stream_records(&self) -> Result<Vec<StreamRecord>> {
        self.inner.fetch_all_stream_records()
    }
    fn fetch_stream_spec(&self, path: &StreamPath) -> Result<StreamSpec> {
        self.inner.fetch_stream_spec(path)
    }
    fn save_stream_spec(&self, spec: &StreamSpec) -> Result<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.send(()).unwrap();
            gate.release.recv().unwrap();
        }
        self.inner.save_stream_spec(spec)
    }
    fn read_file(&self, depot_path: &str) -> Result<Vec<u8>> {
        self.inner.read_file(depot_path)
    }
    fn read_file_at_revision(&self, depot_path: &str, revision: u32) -> Result<Vec<u8>> {
        self.inner.read_file_at_revision(depot_path, revision)
    }
    fn list_file_revisions(&self, depot_path: &str) -> Result<Vec<RevisionInfo>> {
        self.inner.list_file_revisions(depot_path)
    }
    fn file_exists_at_head(&self, depot_path: &str) -> Result<bool> {
        self.inner.file_exists_at_head(depot_path)
    }
    fn sync(&self, depot_path: &str) -> Result<()> {
        self.inner.sync(depot_path)
    }
    fn resolve_workspace_path(&self, depot_path: &str) -> Result<PathBuf> {
        self.inner.resolve_workspace_path(depot_path)
    }
    fn create_changelist(&self, description: &str) -> Result<ChangelistId> {
        self.inner.create_changelist(description)
    }
    fn opened_in(&self, depot_path: &str) -> Result<Option<ChangelistId>> {
        self.inner.opened_in(depot_path)
    }
    fn open_for_edit(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        self.inner.open_for_edit(depot_path, changelist)
    }
    fn open_for_add(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        self.inner.open_for_add(depot_path, changelist)
    }
    fn reopen(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        self.inner.reopen(depot_path, changelist)
    }
    fn list_opened_files(&self, changelist: ChangelistId) -> Result<Vec<OpenedFile>> {
        self.inner.list_opened_files(changelist)
    }
    fn submit(&self, changelist: ChangelistId) -> Result<ChangelistId> {
        self.inner.submit(changelist)
    }
}

#[test]
fn test_second_publish_blocked_while_first_in_flight() {
    init_tracing();
    let workspace = temp_workspace("concurrent_same_root");
    let depot = MemoryDepot::new(workspace.clone());
    sample_streams(&depot);
    depot.insert_stream(StreamSpec::new("//other", None));

    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel();
    let gated = GatedDepot {
        inner: depot.clone(),
        gate: Mutex::new(Some(Gate {
            entered: entered_tx,
            release: release_rx,
        })),
    };
    let session = DepotSession::connect(gated, &Config::default_config()).unwrap();
    let main = session.load_hierarchy(&StreamPath::new(ROOT)).unwrap();
    let other = session.load_hierarchy(&StreamPath::new("//other")).unwrap();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| session.publish(&main, &PublishRequest::new(ROOT, "first")));
        entered_rx.recv().unwrap();
        assert!(session.is_publishing(&StreamPath::new(ROOT)));

        let blocked = session
            .publish(&main, &PublishRequest::new("//main/dev", "second"))
            .unwrap_err();
        assert_eq!(blocked.stage, PublishStage::Preflight);
        assert!(matches!(blocked.source, Error::PublishInProgress(_)));
        assert_eq!(blocked.pending_changelist, None);

        // A different root is not blocked
        let independent = session
            .publish(&other, &PublishRequest::new("//other", "independent"))
            .unwrap();
        assert!(matches!(independent.status, PublishStatus::Submitted { .. }));

        release_tx.send(()).unwrap();
        let outcome = first.join().unwrap().unwrap();
        assert!(matches!(outcome.status, PublishStatus::Submitted { .. }));
    });

    assert!(!session.is_publishing(&StreamPath::new(ROOT)));
    std::fs::remove_dir_all(workspace).ok();
}

#[tokio::test]
async fn test_background_publishes_for_distinct_roots() {
    init_tracing();
    let workspace = temp_workspace("concurrent_roots");
    let depot = MemoryDepot::new(workspace.clone());
    sample_streams(&depot);
    depot.insert_stream(StreamSpec::new("//other", None));

    let session =
        Arc::new(DepotSession::connect(depot.clone(), &Config::default_config()).unwrap());
    let main = session.load_hierarchy(&StreamPath::new(ROOT)).unwrap();
    let other = session.load_hierarchy(&StreamPath::new("//other")).unwrap();

    let a = spawn_publish(Arc::clone(&session), main, PublishRequest::new(ROOT, "main"));
    let b = spawn_publish(Arc::clone(&session), other, PublishRequest::new("//other", "other"));

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_ne!(a.snapshot_path, b.snapshot_path);

    let mut files = depot.depot_files();
    files.sort();
    assert_eq!(
        files,
        vec![
            "//main/.streamkeeper/streamkeeper-history.json".to_string(),
            "//other/.streamkeeper/streamkeeper-history.json".to_string(),
        ]
    );

    std::fs::remove_dir_all(workspace).ok();
}
