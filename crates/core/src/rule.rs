//! Inheritance rules attached to streams.

use crate::types::StreamPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a rule does to the paths matching its pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Paths are left out of the stream's workspaces
    Ignore,
    /// Paths are relocated to `target`
    Remap { target: String },
}

impl RuleKind {
    /// Wire tag used in snapshots and on the server.
    pub fn tag(&self) -> &'static str {
        match self {
            RuleKind::Ignore => "ignore",
            RuleKind::Remap { .. } => "remap",
        }
    }

    pub fn remap_target(&self) -> Option<&str> {
        match self {
            RuleKind::Ignore => None,
            RuleKind::Remap { target } => Some(target),
        }
    }
}

/// A single ignore or remap directive and the stream that owns it.
///
/// Equality covers `(kind, pattern, remap target)` only; `owner` is
/// provenance. Use [`Rule::same_provenance`] when the owner matters too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord", into = "RuleRecord")]
pub struct Rule {
    kind: RuleKind,
    pattern: String,
    owner: StreamPath,
}

impl Rule {
    pub fn new(kind: RuleKind, pattern: impl Into<String>, owner: StreamPath) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            owner,
        }
    }

    pub fn ignore(pattern: impl Into<String>, owner: impl Into<StreamPath>) -> Self {
        Self::new(RuleKind::Ignore, pattern, owner.into())
    }

    pub fn remap(
        pattern: impl Into<String>,
        target: impl Into<String>,
        owner: impl Into<StreamPath>,
    ) -> Self {
        Self::new(
            RuleKind::Remap {
                target: target.into(),
            },
            pattern,
            owner.into(),
        )
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn owner(&self) -> &StreamPath {
        &self.owner
    }

    pub fn remap_target(&self) -> Option<&str> {
        self.kind.remap_target()
    }

    /// Same rule re-homed on another stream.
    pub fn with_owner(&self, owner: StreamPath) -> Self {
        Self {
            kind: self.kind.clone(),
            pattern: self.pattern.clone(),
            owner,
        }
    }

    /// Diff matching key: kind tag plus pattern.
    pub fn match_key(&self) -> (&'static str, &str) {
        (self.kind.tag(), &self.pattern)
    }

    /// Equality including the owning stream.
    pub fn same_provenance(&self, other: &Rule) -> bool {
        self == other && self.owner.matches(&other.owner)
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.pattern == other.pattern
    }
}

impl Eq for Rule {}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuleKind::Ignore => write!(f, "ignore {} ({})", self.pattern, self.owner),
            RuleKind::Remap { target } => {
                write!(f, "remap {} -> {} ({})", self.pattern, target, self.owner)
            }
        }
    }
}

/// A rule as seen from a particular node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRule<'a> {
    pub rule: &'a Rule,
    /// True when the rule is owned by the queried node itself
    pub is_local: bool,
}

/// Snapshot file representation of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleRecord {
    kind: String,
    pattern: String,
    #[serde(default)]
    remap_target: Option<String>,
    owner: StreamPath,
}

impl TryFrom<RuleRecord> for Rule {
    type Error = String;

    fn try_from(record: RuleRecord) -> Result<Self, Self::Error> {
        let kind = match (record.kind.to_ascii_lowercase().as_str(), record.remap_target) {
            ("ignore", None) => RuleKind::Ignore,
            ("ignore", Some(target)) => {
                return Err(format!(
                    "ignore rule '{}' carries a remap target '{}'",
                    record.pattern, target
                ))
            }
            ("remap", Some(target)) => RuleKind::Remap { target },
            ("remap", None) => {
                return Err(format!("remap rule '{}' has no remap target", record.pattern))
            }
            (other, _) => return Err(format!("unknown rule kind '{}'", other)),
        };

        Ok(Rule {
            kind,
            pattern: record.pattern,
            owner: record.owner,
        })
    }
}

impl From<Rule> for RuleRecord {
    fn from(rule: Rule) -> Self {
        RuleRecord {
            kind: rule.kind.tag().to_string(),
            remap_target: rule.kind.remap_target().map(str::to_string),
            pattern: rule.pattern,
            owner: rule.owner,
        }
    }
}
