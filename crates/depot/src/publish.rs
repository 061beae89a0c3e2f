//! Transactional publish protocol.
//!
//! A publish runs strictly in order:
//!
//! 1. **UpdateRemoteRules** - encode the edited stream's local rules into
//!    its spec and save it.
//! 2. **BuildSnapshot** - capture the whole in-memory hierarchy.
//! 3. **ResolveSnapshotFilePath** - one stable depot path per hierarchy
//!    root; the server's revision history is the snapshot timeline.
//! 4. **OpenForWrite** - get the snapshot file opened in a fresh
//!    changelist (reopen, edit, or add), write it, and verify the server
//!    actually lists it in that changelist.
//! 5. **Commit** - submit, or leave the changelist pending.
//!
//! Nothing is rolled back. A failure after the changelist exists leaves it
//! pending on the server and the error says so.

use crate::error::{OpenStep, PublishError, PublishResult, PublishStage};
use crate::server::{DepotServer, FileAction};
use crate::session::DepotSession;
use serde::Serialize;
use std::path::{Path, PathBuf};
use streamkeeper_core::{
    CaptureOptions, ChangelistId, Error, Result, Snapshot, StreamHierarchy, StreamNode,
    StreamPath,
};
use tracing::{error, info, warn};

/// File name used when the storage path names a directory.
pub const HISTORY_FILE_NAME: &str = "streamkeeper-history.json";

/// What to publish and how far to take it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Stream whose local rules are written to the server
    pub stream: StreamPath,
    /// Changelist description
    pub description: String,
    /// Submit the changelist instead of leaving it pending
    pub submit: bool,
}

impl PublishRequest {
    pub fn new(stream: impl Into<StreamPath>, description: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            description: description.into(),
            submit: true,
        }
    }

    /// Leave the changelist pending after a successful open.
    pub fn pending(mut self) -> Self {
        self.submit = false;
        self
    }
}

/// How the snapshot file ended up opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpenMode {
    /// Already opened elsewhere and moved into the new changelist
    Reopened { from: ChangelistId },
    /// Existing file synced and opened for edit
    Edited,
    /// New file opened for add
    Added,
}

/// Final state of the publish changelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishStatus {
    Submitted { changelist: ChangelistId },
    Pending { changelist: ChangelistId },
}

/// Successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub stream: StreamPath,
    pub snapshot_path: String,
    pub local_path: PathBuf,
    pub snapshot_digest: String,
    pub open_mode: OpenMode,
    pub status: PublishStatus,
}

/// Snapshot file opened in a changelist, ready to commit.
struct OpenedSnapshot {
    changelist: ChangelistId,
    local_path: PathBuf,
    mode: OpenMode,
}

/// Depot path of the snapshot file for a hierarchy root.
///
/// A storage path ending in `.json` names the file itself. Otherwise it
/// names a directory: absolute (`//...`) directories receive
/// `<root-slug>.json`, relative ones are nested under the root stream and
/// receive [`HISTORY_FILE_NAME`].
pub fn resolve_snapshot_path(root: &StreamPath, storage_path: &str) -> Result<String> {
    let storage = storage_path.trim().trim_end_matches('/');
    if storage.is_empty() {
        return Err(Error::Config("snapshot storage path is empty".to_string()));
    }
    if storage.split('/').any(|segment| segment == "..") {
        return Err(Error::Config(format!(
            "snapshot storage path must not contain '..': {}",
            storage
        )));
    }

    let names_file = storage.to_ascii_lowercase().ends_with(".json");
    let path = if storage.starts_with("//") {
        if names_file {
            storage.to_string()
        } else {
            format!("{}/{}.json", storage, root.slug())
        }
    } else if names_file {
        root.join(storage)
    } else {
        format!("{}/{}", root.join(storage), HISTORY_FILE_NAME)
    };

    Ok(path)
}

/// Runs the publish protocol against one session.
pub struct Publisher<'s, S: DepotServer> {
    session: &'s DepotSession<S>,
}

impl<'s, S: DepotServer> Publisher<'s, S> {
    pub fn new(session: &'s DepotSession<S>) -> Self {
        Self { session }
    }

    fn server(&self) -> &S {
        self.session.server()
    }

    /// Publish `request.stream`'s rules and a snapshot of `hierarchy`.
    pub fn publish(
        &self,
        hierarchy: &StreamHierarchy,
        request: &PublishRequest,
    ) -> PublishResult<PublishOutcome> {
        let root = hierarchy.root_path().clone();
        let preflight = || PublishError::at(PublishStage::Preflight, None);

        let _guard = self.session.begin_publish(&root).map_err(preflight())?;
        self.session.ensure_connected().map_err(preflight())?;
        let node = hierarchy.get(&request.stream).map_err(preflight())?;

        info!(
            stream = %node.path,
            root = %root,
            submit = request.submit,
            "Publishing stream rules"
        );

        let result = self.run(hierarchy, node, &root, request);
        if let Err(err) = &result {
            error!(
                stream = %node.path,
                stage = %err.stage,
                pending_changelist = ?err.pending_changelist,
                error = %err.source,
                "Publish aborted"
            );
        }
        result
    }

    fn run(
        &self,
        hierarchy: &StreamHierarchy,
        node: &StreamNode,
        root: &StreamPath,
        request: &PublishRequest,
    ) -> PublishResult<PublishOutcome> {
        self.update_remote_rules(node)
            .map_err(PublishError::at(PublishStage::UpdateRemoteRules, None))?;

        let snapshot = Snapshot::capture(
            hierarchy,
            CaptureOptions {
                track_parents: self.session.history_config().track_parents,
            },
        );
        let content = snapshot
            .to_json()
            .map_err(PublishError::at(PublishStage::BuildSnapshot, None))?;
        let digest = snapshot.digest();
        info!(streams = snapshot.stream_count(), digest = %digest, "Snapshot built");

        let snapshot_path =
            resolve_snapshot_path(root, &self.session.history_config().storage_path)
                .map_err(PublishError::at(PublishStage::ResolveSnapshotFilePath, None))?;

        let opened = self.open_for_write(&snapshot_path, content.as_bytes(), &request.description)?;

        let status = if request.submit {
            let submitted = self.server().submit(opened.changelist).map_err(PublishError::at(
                PublishStage::Commit,
                Some(opened.changelist),
            ))?;
            info!(changelist = submitted, path = %snapshot_path, "Snapshot submitted");
            PublishStatus::Submitted {
                changelist: submitted,
            }
        } else {
            info!(
                changelist = opened.changelist,
                path = %snapshot_path,
                "Snapshot left in pending changelist"
            );
            PublishStatus::Pending {
                changelist: opened.changelist,
            }
        };

        Ok(PublishOutcome {
            stream: node.path.clone(),
            snapshot_path,
            local_path: opened.local_path,
            snapshot_digest: digest,
            open_mode: opened.mode,
            status,
        })
    }

    fn update_remote_rules(&self, node: &StreamNode) -> Result<()> {
        let mut spec = self.server().fetch_stream_spec(&node.path)?;
        self.session.strategy().encode(&mut spec, &node.local_rules);
        self.server().save_stream_spec(&spec)?;
        info!(
            stream = %node.path,
            remapped = spec.remapped.len(),
            ignored = node.local_rules.len() - spec.remapped.len(),
            "Stream spec updated"
        );
        Ok(())
    }

    fn open_for_write(
        &self,
        depot_path: &str,
        content: &[u8],
        description: &str,
    ) -> PublishResult<OpenedSnapshot> {
        let stage = PublishStage::OpenForWrite;

        let local_path = self
            .resolve_local_path(depot_path)
            .map_err(PublishError::at(stage(OpenStep::ResolveLocalPath), None))?;

        let changelist = self
            .server()
            .create_changelist(description)
            .map_err(PublishError::at(stage(OpenStep::CreateChangelist), None))?;
        let pending = Some(changelist);
        info!(changelist, path = %depot_path, "Changelist created for snapshot");

        let already_opened = self
            .server()
            .opened_in(depot_path)
            .map_err(PublishError::at(stage(OpenStep::CheckOpened), pending))?;

        let mut mode = match already_opened {
            Some(previous) => self.reopen(depot_path, previous, changelist)?,
            None => None,
        };

        if mode.is_none() {
            let exists = self
                .server()
                .file_exists_at_head(depot_path)
                .map_err(PublishError::at(stage(OpenStep::CheckHead), pending))?;
            if exists {
                mode = self.try_edit(depot_path, changelist);
            }
        }

        write_local(&local_path, content)
            .map_err(PublishError::at(stage(OpenStep::WriteContent), pending))?;

        let mode = match mode {
            Some(mode) => mode,
            None => {
                self.server()
                    .open_for_add(depot_path, changelist)
                    .map_err(PublishError::at(stage(OpenStep::OpenForAdd), pending))?;
                OpenMode::Added
            }
        };

        self.verify_opened(depot_path, changelist)
            .map_err(PublishError::at(stage(OpenStep::Verification), pending))?;

        info!(changelist, mode = ?mode, path = %depot_path, "Snapshot file opened");
        Ok(OpenedSnapshot {
            changelist,
            local_path,
            mode,
        })
    }

    fn resolve_local_path(&self, depot_path: &str) -> Result<PathBuf> {
        match self.server().resolve_workspace_path(depot_path) {
            Ok(path) => Ok(path),
            Err(err) => {
                warn!(
                    path = %depot_path,
                    error = %err,
                    "Workspace mapping query failed; deriving path from workspace root"
                );
                let workspace = self.server().workspace().map_err(|e| Error::PathResolutionFailure {
                    depot_path: depot_path.to_string(),
                    reason: format!("workspace lookup failed: {}", e),
                })?;
                workspace.local_path_for(depot_path)
            }
        }
    }

    /// Move the file out of a leftover changelist.
    ///
    /// One retry is made if the first reopen fails while the file is still
    /// opened. `Ok(None)` means the file is no longer opened anywhere and
    /// the caller should fall through to edit/add.
    fn reopen(
        &self,
        depot_path: &str,
        previous: ChangelistId,
        changelist: ChangelistId,
    ) -> PublishResult<Option<OpenMode>> {
        let fail = PublishError::at(PublishStage::OpenForWrite(OpenStep::Reopen), Some(changelist));

        match self.server().reopen(depot_path, changelist) {
            Ok(()) => {
                info!(
                    path = %depot_path,
                    from = previous,
                    to = changelist,
                    "Reopened snapshot file"
                );
                return Ok(Some(OpenMode::Reopened { from: previous }));
            }
            Err(err) => warn!(path = %depot_path, error = %err, "Reopen failed; retrying once"),
        }

        let still_opened = self.server().opened_in(depot_path);
        match still_opened {
            Ok(Some(current)) if current == changelist => {
                Ok(Some(OpenMode::Reopened { from: previous }))
            }
            Ok(Some(current)) => {
                self.server().reopen(depot_path, changelist).map_err(fail)?;
                Ok(Some(OpenMode::Reopened { from: current }))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(fail(err)),
        }
    }

    /// Sync and open for edit; any failure means "fall through to add".
    fn try_edit(&self, depot_path: &str, changelist: ChangelistId) -> Option<OpenMode> {
        let attempt = self
            .server()
            .sync(depot_path)
            .and_then(|()| self.server().open_for_edit(depot_path, changelist));

        match attempt {
            Ok(()) => Some(OpenMode::Edited),
            Err(err) => {
                warn!(
                    path = %depot_path,
                    error = %err,
                    "Open for edit failed; falling back to add"
                );
                None
            }
        }
    }

    fn verify_opened(&self, depot_path: &str, changelist: ChangelistId) -> Result<()> {
        let opened = self.server().list_opened_files(changelist)?;
        let found = opened.iter().any(|file| {
            file.depot_path.eq_ignore_ascii_case(depot_path)
                && matches!(file.action, FileAction::Add | FileAction::Edit)
        });

        if found {
            Ok(())
        } else {
            Err(Error::RemoteWriteConflict(format!(
                "{} is not opened in changelist {}",
                depot_path, changelist
            )))
        }
    }
}

fn write_local(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

impl<S: DepotServer> DepotSession<S> {
    /// Run the publish protocol described in [`crate::publish`].
    pub fn publish(
        &self,
        hierarchy: &StreamHierarchy,
        request: &PublishRequest,
    ) -> PublishResult<PublishOutcome> {
        Publisher::new(self).publish(hierarchy, request)
    }

    /// Depot path of the snapshot file for `root`.
    pub fn snapshot_path(&self, root: &StreamPath) -> Result<String> {
        resolve_snapshot_path(root, &self.history_config().storage_path)
    }
}
