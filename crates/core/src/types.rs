//! Shared identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned changelist number.
pub type ChangelistId = u32;

/// Depot path of a stream, e.g. `//main/dev`.
///
/// `Eq`/`Ord` are exact so the type can key serialized maps; hierarchy
/// lookups go through [`StreamPath::key`] and [`StreamPath::matches`],
/// which ignore ASCII case the way the server does.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamPath(String);

impl StreamPath {
    /// Wrap a depot path, dropping any trailing slash.
    pub fn new(path: impl Into<String>) -> Self {
        let mut path = path.into();
        while path.len() > 2 && path.ends_with('/') {
            path.pop();
        }
        Self(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalized lookup key.
    pub fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Case-insensitive path comparison.
    pub fn matches(&self, other: &StreamPath) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Last path segment (`dev` for `//main/dev`).
    pub fn name(&self) -> &str {
        self.0
            .trim_start_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }

    /// Depot-absolute paths start with `//`.
    pub fn is_depot_path(&self) -> bool {
        self.0.starts_with("//")
    }

    /// Append a relative path below this stream.
    pub fn join(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches("./").trim_matches('/');
        if relative.is_empty() {
            self.0.clone()
        } else {
            format!("{}/{}", self.0, relative)
        }
    }

    /// Filesystem-safe rendering (`main_dev` for `//main/dev`).
    pub fn slug(&self) -> String {
        self.0
            .trim_start_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for StreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for StreamPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl AsRef<str> for StreamPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Current time in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
