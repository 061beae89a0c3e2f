//! Depot server boundary.
//!
//! [`DepotServer`] is the capability the rest of the crate consumes. A real
//! adapter wraps the version-control client; [`MemoryDepot`] is the
//! in-process stand-in used by tests.
//!
//! [`MemoryDepot`]: crate::memory::MemoryDepot

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use streamkeeper_core::{ChangelistId, Error, Result, StreamPath, StreamRecord};

/// Feature set reported by the server, read once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Release year of the server (`2019` for 2019.1)
    pub server_year: u32,
    /// Stream specs carry a dedicated `Ignored` field
    pub supports_ignored_field: bool,
}

impl ServerCapabilities {
    pub fn modern() -> Self {
        Self {
            server_year: 2023,
            supports_ignored_field: true,
        }
    }

    pub fn legacy() -> Self {
        Self {
            server_year: 2014,
            supports_ignored_field: false,
        }
    }
}

/// Client workspace the session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub client: String,
    pub user: String,
    /// Local root directory of the workspace
    pub root: PathBuf,
    /// Stream the workspace is switched to, if any
    pub stream: Option<StreamPath>,
}

impl WorkspaceInfo {
    /// Derive a local path from the workspace root and stream mapping.
    ///
    /// Files under the workspace stream map below the root with the stream
    /// prefix removed; anything else maps below the root by its full depot
    /// path minus the leading `//`.
    pub fn local_path_for(&self, depot_path: &str) -> Result<PathBuf> {
        let failure = |reason: &str| Error::PathResolutionFailure {
            depot_path: depot_path.to_string(),
            reason: reason.to_string(),
        };

        if !depot_path.starts_with("//") {
            return Err(failure("not a depot path"));
        }

        let relative = self
            .stream
            .as_ref()
            .and_then(|stream| strip_prefix_ignore_case(depot_path, &format!("{}/", stream)))
            .unwrap_or_else(|| depot_path.trim_start_matches('/'));

        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(failure("path names no file"));
        }
        if segments.iter().any(|s| *s == ".." || *s == ".") {
            return Err(failure("relative segments are not allowed"));
        }

        Ok(segments
            .into_iter()
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

/// Kind of a stream `Paths` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Share,
    Isolate,
    Import,
    Exclude,
}

/// One line of a stream spec's `Paths` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub kind: PathKind,
    pub path: String,
}

impl PathEntry {
    pub fn new(kind: PathKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// One line of a stream spec's `Remapped` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapEntry {
    pub from: String,
    pub to: String,
}

/// Editable stream specification as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub stream: StreamPath,
    pub name: String,
    pub parent: Option<StreamPath>,
    pub stream_type: String,
    pub description: String,
    pub paths: Vec<PathEntry>,
    pub remapped: Vec<RemapEntry>,
    pub ignored: Vec<String>,
}

impl StreamSpec {
    /// Minimal spec sharing everything from the parent.
    pub fn new(stream: impl Into<StreamPath>, parent: Option<StreamPath>) -> Self {
        let stream = stream.into();
        let stream_type = if parent.is_some() {
            "development"
        } else {
            "mainline"
        };
        Self {
            name: stream.name().to_string(),
            stream,
            parent,
            stream_type: stream_type.to_string(),
            description: String::new(),
            paths: vec![PathEntry::new(PathKind::Share, "...")],
            remapped: Vec::new(),
            ignored: Vec::new(),
        }
    }

    pub fn record(&self) -> StreamRecord {
        StreamRecord {
            path: self.stream.clone(),
            name: self.name.clone(),
            parent: self.parent.clone(),
            stream_type: self.stream_type.clone(),
        }
    }
}

/// One historical revision of a depot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub revision: u32,
    pub changelist: ChangelistId,
    /// Submit time in milliseconds since the UNIX epoch
    pub timestamp_ms: u64,
    pub user: String,
    pub description: String,
    /// `add`, `edit`, ...
    pub action: String,
}

/// How a file is opened in a pending changelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Add,
    Edit,
}

/// A file opened in a pending changelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedFile {
    pub depot_path: String,
    pub changelist: ChangelistId,
    pub action: FileAction,
}

/// Remote version-control server, as seen by one client session.
///
/// Every call may block on the network. Implementations report missing
/// objects as [`Error::RemoteObjectNotFound`] and rejected writes as
/// [`Error::RemoteWriteConflict`].
pub trait DepotServer {
    fn connect(&self) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn capabilities(&self) -> Result<ServerCapabilities>;
    fn workspace(&self) -> Result<WorkspaceInfo>;

    fn fetch_stream_record(&self, path: &StreamPath) -> Result<StreamRecord>;
    fn fetch_all_stream_records(&self) -> Result<Vec<StreamRecord>>;
    fn fetch_stream_spec(&self, path: &StreamPath) -> Result<StreamSpec>;
    fn save_stream_spec(&self, spec: &StreamSpec) -> Result<()>;

    fn read_file(&self, depot_path: &str) -> Result<Vec<u8>>;
    fn read_file_at_revision(&self, depot_path: &str, revision: u32) -> Result<Vec<u8>>;
    /// Revisions newest first
    fn list_file_revisions(&self, depot_path: &str) -> Result<Vec<RevisionInfo>>;
    fn file_exists_at_head(&self, depot_path: &str) -> Result<bool>;
    /// Bring the workspace copy of a file to the head revision
    fn sync(&self, depot_path: &str) -> Result<()>;
    fn resolve_workspace_path(&self, depot_path: &str) -> Result<PathBuf>;

    fn create_changelist(&self, description: &str) -> Result<ChangelistId>;
    /// Pending changelist of this client holding the file, if any
    fn opened_in(&self, depot_path: &str) -> Result<Option<ChangelistId>>;
    fn open_for_edit(&self, depot_path: &str, changelist: ChangelistId) -> Result<()>;
    fn open_for_add(&self, depot_path: &str, changelist: ChangelistId) -> Result<()>;
    fn reopen(&self, depot_path: &str, changelist: ChangelistId) -> Result<()>;
    fn list_opened_files(&self, changelist: ChangelistId) -> Result<Vec<OpenedFile>>;
    /// Submit a pending changelist, returning the submitted number
    fn submit(&self, changelist: ChangelistId) -> Result<ChangelistId>;
}
