//! Server-facing half of streamkeeper.
//!
//! This crate connects the in-memory model from `streamkeeper-core` to a
//! version-control server:
//!
//! - [`DepotServer`]: the server boundary, with [`MemoryDepot`] as an
//!   in-process implementation
//! - [`DepotSession`]: an explicit connection handle carrying the rule
//!   [`RuleStrategy`] chosen for that server
//! - [`DepotSession::publish`]: the staged publish protocol
//! - [`SnapshotHistory`]: listing, previewing and restoring snapshot
//!   revisions

pub mod error;
pub mod memory;
pub mod publish;
pub mod revisions;
pub mod server;
pub mod session;
pub mod strategy;
#[cfg(feature = "worker")]
pub mod worker;

pub use error::{OpenStep, PublishError, PublishResult, PublishStage};
pub use memory::{DepotOp, MemoryDepot};
pub use publish::{
    resolve_snapshot_path, OpenMode, PublishOutcome, PublishRequest, PublishStatus, Publisher,
    HISTORY_FILE_NAME,
};
pub use revisions::SnapshotHistory;
pub use server::{
    DepotServer, FileAction, OpenedFile, PathEntry, PathKind, RemapEntry, RevisionInfo,
    ServerCapabilities, StreamSpec, WorkspaceInfo,
};
pub use session::DepotSession;
pub use strategy::{RuleStrategy, StrategyEntry, STRATEGY_TABLE};
#[cfg(feature = "worker")]
pub use worker::spawn_publish;
