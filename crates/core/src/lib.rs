//! Core functionality for streamkeeper.
//!
//! This crate provides the stream hierarchy model, rule resolution and the
//! snapshot engine. It performs no server I/O of its own; remote data comes
//! in through [`StreamSource`] and leaves as [`Snapshot`] values.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod logging;
pub mod resolver;
pub mod rule;
pub mod snapshot;
pub mod types;

pub use config::{Config, HistoryConfig, ServerConfig, SessionConfig, SettingsStore};
pub use error::{Error, RemoteObject, Result};
pub use hierarchy::{
    build_hierarchy, HierarchyBuilder, StreamHierarchy, StreamNode, StreamRecord, StreamSource,
};
pub use resolver::RuleResolver;
pub use rule::{ResolvedRule, Rule, RuleKind};
pub use snapshot::{diff_rules, CaptureOptions, RestoreReport, Snapshot, SnapshotDiff};
pub use types::{now_ms, ChangelistId, StreamPath};
