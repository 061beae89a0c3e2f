//! In-memory depot server.
//!
//! [`MemoryDepot`] keeps streams, file revisions and pending changelists in
//! process and writes synced/edited files under a real local workspace
//! root. Clones share state, so a test can keep one handle for inspection
//! while the session owns another.
//!
//! Failures can be injected per operation with [`MemoryDepot::fail_next`],
//! and [`MemoryDepot::ignore_next`] makes an open call report success
//! without doing anything, the way a misbehaving server might.

use crate::server::{
    DepotServer, FileAction, OpenedFile, RevisionInfo, ServerCapabilities, StreamSpec,
    WorkspaceInfo,
};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use streamkeeper_core::{ChangelistId, Error, RemoteObject, Result, StreamPath, StreamRecord};
use tracing::debug;

const EPOCH_MS: u64 = 1_700_000_000_000;

/// Server operations, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepotOp {
    Connect,
    Disconnect,
    Capabilities,
    Workspace,
    FetchStreamRecord,
    FetchAllStreamRecords,
    FetchStreamSpec,
    SaveStreamSpec,
    ReadFile,
    ReadFileAtRevision,
    ListFileRevisions,
    FileExistsAtHead,
    Sync,
    ResolveWorkspacePath,
    CreateChangelist,
    OpenedIn,
    OpenForEdit,
    OpenForAdd,
    Reopen,
    ListOpenedFiles,
    Submit,
}

#[derive(Debug, Clone)]
struct StoredRevision {
    info: RevisionInfo,
    content: Vec<u8>,
}

#[derive(Debug, Clone)]
struct DepotFile {
    depot_path: String,
    /// Oldest first; index + 1 is the revision number
    revisions: Vec<StoredRevision>,
}

#[derive(Debug, Clone, Default)]
struct PendingChangelist {
    description: String,
    files: Vec<OpenedFile>,
}

#[derive(Debug)]
struct Inner {
    connected: bool,
    capabilities: ServerCapabilities,
    workspace: WorkspaceInfo,
    streams: BTreeMap<String, StreamSpec>,
    files: BTreeMap<String, DepotFile>,
    pending: BTreeMap<ChangelistId, PendingChangelist>,
    next_changelist: ChangelistId,
    clock: u64,
    failures: HashMap<DepotOp, u32>,
    ignored: HashMap<DepotOp, u32>,
    calls: Vec<DepotOp>,
}

impl Inner {
    fn next_changelist(&mut self) -> ChangelistId {
        let id = self.next_changelist;
        self.next_changelist += 1;
        id
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        EPOCH_MS + self.clock * 1000
    }

    fn opened_in(&self, depot_path: &str) -> Option<ChangelistId> {
        self.pending.iter().find_map(|(id, pending)| {
            pending
                .files
                .iter()
                .any(|file| file.depot_path.eq_ignore_ascii_case(depot_path))
                .then_some(*id)
        })
    }

    fn pending_mut(&mut self, changelist: ChangelistId) -> Result<&mut PendingChangelist> {
        self.pending
            .get_mut(&changelist)
            .ok_or_else(|| Error::RemoteObjectNotFound {
                kind: RemoteObject::Changelist,
                path: changelist.to_string(),
            })
    }

    fn head(&self, depot_path: &str) -> Option<&StoredRevision> {
        self.files
            .get(&file_key(depot_path))
            .and_then(|file| file.revisions.last())
    }

    fn append_revision(
        &mut self,
        depot_path: &str,
        changelist: ChangelistId,
        description: &str,
        content: Vec<u8>,
    ) -> u32 {
        let timestamp_ms = self.tick();
        let user = self.workspace.user.clone();
        let file = self
            .files
            .entry(file_key(depot_path))
            .or_insert_with(|| DepotFile {
                depot_path: depot_path.to_string(),
                revisions: Vec::new(),
            });

        let revision = file.revisions.len() as u32 + 1;
        let action = if revision == 1 { "add" } else { "edit" };
        file.revisions.push(StoredRevision {
            info: RevisionInfo {
                revision,
                changelist,
                timestamp_ms,
                user,
                description: description.to_string(),
                action: action.to_string(),
            },
            content,
        });
        revision
    }
}

fn file_key(depot_path: &str) -> String {
    depot_path.to_ascii_lowercase()
}

/// Shared in-process depot.
#[derive(Debug, Clone)]
pub struct MemoryDepot {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDepot {
    /// Empty, disconnected depot with a workspace rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        let inner = Inner {
            connected: false,
            capabilities: ServerCapabilities::modern(),
            workspace: WorkspaceInfo {
                client: "memory".to_string(),
                user: "streamkeeper".to_string(),
                root,
                stream: None,
            },
            streams: BTreeMap::new(),
            files: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_changelist: 1,
            clock: 0,
            failures: HashMap::new(),
            ignored: HashMap::new(),
            calls: Vec::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn with_capabilities(self, capabilities: ServerCapabilities) -> Self {
        self.lock().capabilities = capabilities;
        self
    }

    /// Switch the workspace to a stream.
    pub fn with_workspace_stream(self, stream: impl Into<StreamPath>) -> Self {
        self.lock().workspace.stream = Some(stream.into());
        self
    }

    /// Create or replace a stream spec.
    pub fn insert_stream(&self, spec: StreamSpec) {
        self.lock().streams.insert(spec.stream.key(), spec);
    }

    /// Current spec of a stream, bypassing the call log.
    pub fn stream_spec(&self, path: &StreamPath) -> Option<StreamSpec> {
        self.lock().streams.get(&path.key()).cloned()
    }

    /// Submit a revision directly, as another user would. Returns the
    /// changelist number.
    pub fn seed_file(&self, depot_path: &str, content: &[u8], description: &str) -> ChangelistId {
        let mut inner = self.lock();
        let changelist = inner.next_changelist();
        inner.append_revision(depot_path, changelist, description, content.to_vec());
        changelist
    }

    /// Leave a file opened in a fresh pending changelist, as an earlier
    /// interrupted run would. Returns that changelist.
    pub fn leave_opened(&self, depot_path: &str, action: FileAction) -> ChangelistId {
        let mut inner = self.lock();
        let changelist = inner.next_changelist();
        inner.pending.insert(
            changelist,
            PendingChangelist {
                description: "left over".to_string(),
                files: vec![OpenedFile {
                    depot_path: depot_path.to_string(),
                    changelist,
                    action,
                }],
            },
        );
        changelist
    }

    /// Number the next changelist `id`. Later ones follow on from it.
    pub fn set_next_changelist(&self, id: ChangelistId) {
        self.lock().next_changelist = id;
    }

    /// Fail the next call of `op`. Repeated calls stack.
    pub fn fail_next(&self, op: DepotOp) {
        *self.lock().failures.entry(op).or_insert(0) += 1;
    }

    /// Report success on the next call of `op` without any effect.
    pub fn ignore_next(&self, op: DepotOp) {
        *self.lock().ignored.entry(op).or_insert(0) += 1;
    }

    /// Every operation called so far, in order.
    pub fn calls(&self) -> Vec<DepotOp> {
        self.lock().calls.clone()
    }

    pub fn called(&self, op: DepotOp) -> bool {
        self.lock().calls.contains(&op)
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Pending changelist numbers, ascending.
    pub fn pending_changelists(&self) -> Vec<ChangelistId> {
        self.lock().pending.keys().copied().collect()
    }

    /// Description of a pending changelist.
    pub fn pending_description(&self, changelist: ChangelistId) -> Option<String> {
        self.lock()
            .pending
            .get(&changelist)
            .map(|pending| pending.description.clone())
    }

    /// Depot paths of every submitted file.
    pub fn depot_files(&self) -> Vec<String> {
        self.lock()
            .files
            .values()
            .map(|file| file.depot_path.clone())
            .collect()
    }

    /// Head revision number of a file, if it exists.
    pub fn head_revision(&self, depot_path: &str) -> Option<u32> {
        self.lock().head(depot_path).map(|rev| rev.info.revision)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call, apply injected failures, then require a connection.
    fn enter(&self, op: DepotOp) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        inner.calls.push(op);

        if let Some(remaining) = inner.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(op = ?op, "Injected depot failure");
                return Err(Error::Remote(format!("injected failure in {:?}", op)));
            }
        }

        if op != DepotOp::Connect && !inner.connected {
            return Err(Error::NotConnected);
        }
        Ok(inner)
    }

    fn take_ignored(inner: &mut Inner, op: DepotOp) -> bool {
        match inner.ignored.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl DepotServer for MemoryDepot {
    fn connect(&self) -> Result<()> {
        self.enter(DepotOp::Connect)?.connected = true;
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.enter(DepotOp::Disconnect)?.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn capabilities(&self) -> Result<ServerCapabilities> {
        Ok(self.enter(DepotOp::Capabilities)?.capabilities.clone())
    }

    fn workspace(&self) -> Result<WorkspaceInfo> {
        Ok(self.enter(DepotOp::Workspace)?.workspace.clone())
    }

    fn fetch_stream_record(&self, path: &StreamPath) -> Result<StreamRecord> {
        let inner = self.enter(DepotOp::FetchStreamRecord)?;
        inner
            .streams
            .get(&path.key())
            .map(StreamSpec::record)
            .ok_or_else(|| Error::stream_not_found(path.as_str()))
    }

    fn fetch_all_stream_records(&self) -> Result<Vec<StreamRecord>> {
        let inner = self.enter(DepotOp::FetchAllStreamRecords)?;
        Ok(inner.streams.values().map(StreamSpec::record).collect())
    }

    fn fetch_stream_spec(&self, path: &StreamPath) -> Result<StreamSpec> {
        let inner = self.enter(DepotOp::FetchStreamSpec)?;
        inner
            .streams
            .get(&path.key())
            .cloned()
            .ok_or_else(|| Error::stream_not_found(path.as_str()))
    }

    fn save_stream_spec(&self, spec: &StreamSpec) -> Result<()> {
        let mut inner = self.enter(DepotOp::SaveStreamSpec)?;
        match inner.streams.get_mut(&spec.stream.key()) {
            Some(existing) => {
                *existing = spec.clone();
                Ok(())
            }
            None => Err(Error::stream_not_found(spec.stream.as_str())),
        }
    }

    fn read_file(&self, depot_path: &str) -> Result<Vec<u8>> {
        let inner = self.enter(DepotOp::ReadFile)?;
        inner
            .head(depot_path)
            .map(|rev| rev.content.clone())
            .ok_or_else(|| Error::file_not_found(depot_path))
    }

    fn read_file_at_revision(&self, depot_path: &str, revision: u32) -> Result<Vec<u8>> {
        let inner = self.enter(DepotOp::ReadFileAtRevision)?;
        inner
            .files
            .get(&file_key(depot_path))
            .and_then(|file| file.revisions.get((revision as usize).checked_sub(1)?))
            .map(|rev| rev.content.clone())
            .ok_or_else(|| Error::file_not_found(format!("{}#{}", depot_path, revision)))
    }

    fn list_file_revisions(&self, depot_path: &str) -> Result<Vec<RevisionInfo>> {
        let inner = self.enter(DepotOp::ListFileRevisions)?;
        let file = inner
            .files
            .get(&file_key(depot_path))
            .ok_or_else(|| Error::file_not_found(depot_path))?;
        Ok(file
            .revisions
            .iter()
            .rev()
            .map(|rev| rev.info.clone())
            .collect())
    }

    fn file_exists_at_head(&self, depot_path: &str) -> Result<bool> {
        let inner = self.enter(DepotOp::FileExistsAtHead)?;
        Ok(inner.head(depot_path).is_some())
    }

    fn sync(&self, depot_path: &str) -> Result<()> {
        let inner = self.enter(DepotOp::Sync)?;
        let content = inner
            .head(depot_path)
            .map(|rev| rev.content.clone())
            .ok_or_else(|| Error::file_not_found(depot_path))?;
        let local = inner.workspace.local_path_for(depot_path)?;
        drop(inner);

        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&local, content)?;
        Ok(())
    }

    fn resolve_workspace_path(&self, depot_path: &str) -> Result<PathBuf> {
        let inner = self.enter(DepotOp::ResolveWorkspacePath)?;
        inner.workspace.local_path_for(depot_path)
    }

    fn create_changelist(&self, description: &str) -> Result<ChangelistId> {
        let mut inner = self.enter(DepotOp::CreateChangelist)?;
        let changelist = inner.next_changelist();
        inner.pending.insert(
            changelist,
            PendingChangelist {
                description: description.to_string(),
                files: Vec::new(),
            },
        );
        Ok(changelist)
    }

    fn opened_in(&self, depot_path: &str) -> Result<Option<ChangelistId>> {
        let inner = self.enter(DepotOp::OpenedIn)?;
        Ok(inner.opened_in(depot_path))
    }

    fn open_for_edit(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        let mut inner = self.enter(DepotOp::OpenForEdit)?;
        if Self::take_ignored(&mut inner, DepotOp::OpenForEdit) {
            return Ok(());
        }
        if inner.head(depot_path).is_none() {
            return Err(Error::file_not_found(depot_path));
        }
        if let Some(existing) = inner.opened_in(depot_path) {
            return Err(Error::RemoteWriteConflict(format!(
                "{} already opened in changelist {}",
                depot_path, existing
            )));
        }
        inner.pending_mut(changelist)?.files.push(OpenedFile {
            depot_path: depot_path.to_string(),
            changelist,
            action: FileAction::Edit,
        });
        Ok(())
    }

    fn open_for_add(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        let mut inner = self.enter(DepotOp::OpenForAdd)?;
        if Self::take_ignored(&mut inner, DepotOp::OpenForAdd) {
            return Ok(());
        }
        if inner.head(depot_path).is_some() {
            return Err(Error::RemoteWriteConflict(format!(
                "{} already exists at head",
                depot_path
            )));
        }
        if let Some(existing) = inner.opened_in(depot_path) {
            return Err(Error::RemoteWriteConflict(format!(
                "{} already opened in changelist {}",
                depot_path, existing
            )));
        }
        inner.pending_mut(changelist)?.files.push(OpenedFile {
            depot_path: depot_path.to_string(),
            changelist,
            action: FileAction::Add,
        });
        Ok(())
    }

    fn reopen(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        let mut inner = self.enter(DepotOp::Reopen)?;
        inner.pending_mut(changelist)?;

        let current = inner
            .opened_in(depot_path)
            .ok_or_else(|| Error::RemoteWriteConflict(format!("{} is not opened", depot_path)))?;
        if current == changelist {
            return Ok(());
        }

        let source = inner.pending_mut(current)?;
        let index = source
            .files
            .iter()
            .position(|file| file.depot_path.eq_ignore_ascii_case(depot_path))
            .ok_or_else(|| Error::file_not_found(depot_path))?;
        let mut file = source.files.remove(index);
        file.changelist = changelist;
        inner.pending_mut(changelist)?.files.push(file);
        Ok(())
    }

    fn list_opened_files(&self, changelist: ChangelistId) -> Result<Vec<OpenedFile>> {
        let mut inner = self.enter(DepotOp::ListOpenedFiles)?;
        Ok(inner.pending_mut(changelist)?.files.clone())
    }

    fn submit(&self, changelist: ChangelistId) -> Result<ChangelistId> {
        let mut inner = self.enter(DepotOp::Submit)?;
        let pending = inner.pending_mut(changelist)?.clone();
        if pending.files.is_empty() {
            return Err(Error::RemoteWriteConflict(format!(
                "changelist {} has no opened files",
                changelist
            )));
        }

        let mut contents = Vec::with_capacity(pending.files.len());
        for file in &pending.files {
            let local = inner.workspace.local_path_for(&file.depot_path)?;
            let content = std::fs::read(&local).map_err(|e| {
                Error::RemoteWriteConflict(format!(
                    "cannot read {} for submit: {}",
                    local.display(),
                    e
                ))
            })?;
            contents.push((file.depot_path.clone(), content));
        }

        for (depot_path, content) in contents {
            let revision =
                inner.append_revision(&depot_path, changelist, &pending.description, content);
            debug!(path = %depot_path, revision, changelist, "Submitted revision");
        }
        inner.pending.remove(&changelist);
        Ok(changelist)
    }
}
