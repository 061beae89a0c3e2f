//! Error types for publish operations.
//!
//! A failed publish always says which stage failed and whether a pending
//! changelist was left on the server for manual follow-up.

use std::fmt;
use streamkeeper_core::{ChangelistId, Error};
use thiserror::Error;

/// Sub-steps of [`PublishStage::OpenForWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStep {
    ResolveLocalPath,
    CreateChangelist,
    CheckOpened,
    Reopen,
    CheckHead,
    WriteContent,
    OpenForAdd,
    Verification,
}

impl fmt::Display for OpenStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenStep::ResolveLocalPath => "local path resolution",
            OpenStep::CreateChangelist => "changelist creation",
            OpenStep::CheckOpened => "opened-file check",
            OpenStep::Reopen => "reopen",
            OpenStep::CheckHead => "head revision check",
            OpenStep::WriteContent => "local write",
            OpenStep::OpenForAdd => "open for add",
            OpenStep::Verification => "verification step",
        };
        f.write_str(name)
    }
}

/// Stages of the publish protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    /// Connection and in-flight checks before any remote write
    Preflight,
    UpdateRemoteRules,
    BuildSnapshot,
    ResolveSnapshotFilePath,
    OpenForWrite(OpenStep),
    Commit,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStage::Preflight => f.write_str("Preflight"),
            PublishStage::UpdateRemoteRules => f.write_str("UpdateRemoteRules"),
            PublishStage::BuildSnapshot => f.write_str("BuildSnapshot"),
            PublishStage::ResolveSnapshotFilePath => f.write_str("ResolveSnapshotFilePath"),
            PublishStage::OpenForWrite(step) => write!(f, "OpenForWrite: {}", step),
            PublishStage::Commit => f.write_str("Commit"),
        }
    }
}

/// A publish that stopped before completing.
#[derive(Debug, Error)]
#[error("failed at {stage}: {source}; {}", pending_note(.pending_changelist))]
pub struct PublishError {
    pub stage: PublishStage,
    /// Changelist left pending on the server, if one was created
    pub pending_changelist: Option<ChangelistId>,
    #[source]
    pub source: Error,
}

fn pending_note(pending: &Option<ChangelistId>) -> String {
    match pending {
        Some(id) => format!("pending changelist {} left for manual resolution", id),
        None => "no pending changelist left".to_string(),
    }
}

impl PublishError {
    pub fn new(
        stage: PublishStage,
        pending_changelist: Option<ChangelistId>,
        source: Error,
    ) -> Self {
        Self {
            stage,
            pending_changelist,
            source,
        }
    }

    /// Closure for `map_err` at a given stage.
    pub(crate) fn at(
        stage: PublishStage,
        pending_changelist: Option<ChangelistId>,
    ) -> impl FnOnce(Error) -> Self {
        move |source| Self::new(stage, pending_changelist, source)
    }
}

/// Result type for publish operations.
pub type PublishResult<T> = std::result::Result<T, PublishError>;
