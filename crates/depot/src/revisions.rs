//! Snapshot revision history.
//!
//! Each submitted revision of a root's snapshot file is one point in time.
//! [`SnapshotHistory`] lists them, loads any of them, previews what a
//! restore would change for one stream, and restores a revision onto an
//! in-memory hierarchy. Restoring never writes to the server; the caller
//! publishes afterwards if the restored state should stick.

use crate::server::{DepotServer, RevisionInfo};
use crate::session::DepotSession;
use streamkeeper_core::{
    CaptureOptions, RestoreReport, Result, Snapshot, SnapshotDiff, StreamHierarchy, StreamPath,
};
use tracing::{info, warn};

/// Revision history of one hierarchy root's snapshot file.
pub struct SnapshotHistory<'s, S: DepotServer> {
    session: &'s DepotSession<S>,
    root: StreamPath,
    path: String,
}

impl<'s, S: DepotServer> SnapshotHistory<'s, S> {
    pub fn root(&self) -> &StreamPath {
        &self.root
    }

    /// Depot path of the snapshot file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Submitted revisions, newest first.
    ///
    /// A file that was never submitted has no history and yields an empty
    /// list rather than an error.
    pub fn revisions(&self) -> Result<Vec<RevisionInfo>> {
        self.session.ensure_connected()?;
        let server = self.session.server();
        if !server.file_exists_at_head(&self.path)? {
            return Ok(Vec::new());
        }

        let mut revisions = server.list_file_revisions(&self.path)?;
        revisions.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(revisions)
    }

    /// Raw content of one revision.
    pub fn read_at(&self, revision: u32) -> Result<Vec<u8>> {
        self.session.ensure_connected()?;
        self.session
            .server()
            .read_file_at_revision(&self.path, revision)
    }

    /// Parsed snapshot at one revision.
    pub fn snapshot_at(&self, revision: u32) -> Result<Snapshot> {
        let bytes = self.read_at(revision)?;
        Snapshot::from_slice(&bytes).map_err(|err| {
            warn!(path = %self.path, revision, error = %err, "Unreadable snapshot revision");
            err
        })
    }

    /// Parsed snapshot at the head revision.
    pub fn head_snapshot(&self) -> Result<Snapshot> {
        self.session.ensure_connected()?;
        let bytes = self.session.server().read_file(&self.path)?;
        Snapshot::from_slice(&bytes)
    }

    /// What restoring `revision` would change in `stream`'s local rules.
    ///
    /// Compares the live hierarchy (old) against the revision (new). A
    /// stream missing from the revision yields an empty diff, matching
    /// restore, which leaves such streams untouched.
    pub fn preview_restore(
        &self,
        hierarchy: &StreamHierarchy,
        stream: &StreamPath,
        revision: u32,
    ) -> Result<SnapshotDiff> {
        let target = self.snapshot_at(revision)?;
        if target.rules_for(stream).is_none() {
            return Ok(SnapshotDiff::default());
        }

        let current = Snapshot::capture(hierarchy, CaptureOptions::default());
        Ok(current.diff_stream(&target, stream))
    }

    /// Restore `revision` onto `hierarchy` in memory.
    pub fn restore(&self, hierarchy: &mut StreamHierarchy, revision: u32) -> Result<RestoreReport> {
        let snapshot = self.snapshot_at(revision)?;
        let report = snapshot.restore_into(hierarchy);
        info!(
            root = %self.root,
            revision,
            rules_restored = report.rules_restored.len(),
            parents_restored = report.parents_restored.len(),
            skipped_parents = report.skipped_parents.len(),
            "Restored snapshot revision"
        );
        Ok(report)
    }
}

impl<S: DepotServer> DepotSession<S> {
    /// Snapshot history for the hierarchy rooted at `root`.
    pub fn history(&self, root: &StreamPath) -> Result<SnapshotHistory<'_, S>> {
        let path = self.snapshot_path(root)?;
        Ok(SnapshotHistory {
            session: self,
            root: root.clone(),
            path,
        })
    }
}
