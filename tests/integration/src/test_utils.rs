//! Shared fixtures for the integration tests

use std::path::PathBuf;
use streamkeeper_core::{Config, Snapshot, StreamHierarchy, StreamPath};
use streamkeeper_depot::{DepotSession, MemoryDepot, ServerCapabilities, StreamSpec};

/// Root of the sample hierarchy
pub const ROOT: &str = "//main";

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = streamkeeper_core::logging::try_init();
}

/// Fresh temp directory for one test's workspace
pub fn temp_workspace(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("streamkeeper_{}_{}", label, uuid::Uuid::new_v4()))
}

/// Sample streams: //main with an ignore rule, and two children.
pub fn sample_streams(depot: &MemoryDepot) {
    let mut main = StreamSpec::new(ROOT, None);
    main.ignored.push("tmp/...".to_string());
    depot.insert_stream(main);
    depot.insert_stream(StreamSpec::new("//main/dev", Some(StreamPath::new(ROOT))));
    depot.insert_stream(StreamSpec::new("//main/release", Some(StreamPath::new(ROOT))));
}

/// In-memory depot plus a connected session sharing its state.
///
/// The workspace directory is removed on drop.
pub struct TestDepot {
    /// Inspection handle; shares state with the session's copy
    pub depot: MemoryDepot,
    pub session: DepotSession<MemoryDepot>,
    pub workspace_root: PathBuf,
}

impl TestDepot {
    pub fn new(label: &str) -> Self {
        Self::with_config(label, ServerCapabilities::modern(), Config::default_config())
    }

    pub fn legacy(label: &str) -> Self {
        Self::with_config(label, ServerCapabilities::legacy(), Config::default_config())
    }

    pub fn with_config(label: &str, capabilities: ServerCapabilities, config: Config) -> Self {
        init_tracing();
        let workspace_root = temp_workspace(label);
        let depot = MemoryDepot::new(workspace_root.clone()).with_capabilities(capabilities);
        sample_streams(&depot);

        let session = DepotSession::connect(depot.clone(), &config).unwrap();
        Self {
            depot,
            session,
            workspace_root,
        }
    }

    pub fn root(&self) -> StreamPath {
        StreamPath::new(ROOT)
    }

    /// Load the sample hierarchy from the depot.
    pub fn hierarchy(&self) -> StreamHierarchy {
        self.session.load_hierarchy(&self.root()).unwrap()
    }

    pub fn snapshot_path(&self) -> String {
        self.session.snapshot_path(&self.root()).unwrap()
    }

    /// Snapshot at the depot head.
    pub fn head_snapshot(&self) -> Snapshot {
        self.session
            .history(&self.root())
            .unwrap()
            .head_snapshot()
            .unwrap()
    }
}

impl Drop for TestDepot {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.workspace_root).ok();
    }
}
