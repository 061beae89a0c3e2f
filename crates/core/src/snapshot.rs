//! Hierarchy snapshots.
//!
//! A [`Snapshot`] records every stream's *local* rules (inherited rules are
//! re-derived from the tree) and, optionally, each stream's parent. It has
//! no link back to the live tree and is never mutated after capture; each
//! save produces a new one.
//!
//! # File format
//!
//! ```json
//! {
//!   "rulesByStream": { "//main": [ {"kind":"ignore","pattern":"tmp/...","remapTarget":null,"owner":"//main"} ] },
//!   "parentsByStream": { "//main": null, "//main/dev": "//main" }
//! }
//! ```
//!
//! Unknown keys are ignored. A missing `parentsByStream` means no parent
//! data was captured, and restore leaves parents alone.

use crate::error::{Error, Result};
use crate::hierarchy::{StreamHierarchy, StreamRecord, StreamSource};
use crate::rule::Rule;
use crate::types::StreamPath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Options for [`Snapshot::capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Record each stream's parent as well as its rules
    pub track_parents: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            track_parents: true,
        }
    }
}

/// Immutable capture of a hierarchy's rule (and parent) state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    rules_by_stream: BTreeMap<StreamPath, Vec<Rule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parents_by_stream: Option<BTreeMap<StreamPath, Option<StreamPath>>>,
}

/// Rule-level difference between two rule sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<Rule>,
    pub removed: Vec<Rule>,
    /// `(old, new)` pairs sharing kind and pattern
    pub modified: Vec<(Rule, Rule)>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    fn extend(&mut self, other: SnapshotDiff) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.modified.extend(other.modified);
    }
}

/// What [`Snapshot::restore_into`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Streams whose local rules were replaced
    pub rules_restored: Vec<StreamPath>,
    /// Streams whose parent was overwritten
    pub parents_restored: Vec<StreamPath>,
    /// Streams with no entry in the snapshot
    pub untouched: Vec<StreamPath>,
    /// Parent entries that could not be applied, with the reason
    pub skipped_parents: Vec<(StreamPath, String)>,
}

impl Snapshot {
    /// Build a snapshot from raw maps.
    pub fn from_parts(
        rules_by_stream: BTreeMap<StreamPath, Vec<Rule>>,
        parents_by_stream: Option<BTreeMap<StreamPath, Option<StreamPath>>>,
    ) -> Self {
        Self {
            rules_by_stream,
            parents_by_stream,
        }
    }

    /// Capture every reachable node of `hierarchy`.
    pub fn capture(hierarchy: &StreamHierarchy, options: CaptureOptions) -> Self {
        let mut rules_by_stream = BTreeMap::new();
        let mut parents = BTreeMap::new();

        for node in hierarchy.walk() {
            rules_by_stream.insert(node.path.clone(), node.local_rules.clone());
            if options.track_parents {
                parents.insert(node.path.clone(), node.parent_path.clone());
            }
        }

        debug!(
            root = %hierarchy.root_path(),
            streams = rules_by_stream.len(),
            track_parents = options.track_parents,
            "Captured hierarchy snapshot"
        );

        Self {
            rules_by_stream,
            parents_by_stream: options.track_parents.then_some(parents),
        }
    }

    pub fn rules_by_stream(&self) -> &BTreeMap<StreamPath, Vec<Rule>> {
        &self.rules_by_stream
    }

    pub fn parents_by_stream(&self) -> Option<&BTreeMap<StreamPath, Option<StreamPath>>> {
        self.parents_by_stream.as_ref()
    }

    pub fn stream_count(&self) -> usize {
        self.rules_by_stream.len()
    }

    /// Recorded rules for a stream, matched case-insensitively.
    pub fn rules_for(&self, path: &StreamPath) -> Option<&Vec<Rule>> {
        self.rules_by_stream.get(path).or_else(|| {
            self.rules_by_stream
                .iter()
                .find(|(key, _)| key.matches(path))
                .map(|(_, rules)| rules)
        })
    }

    /// Recorded parent for a stream; `None` when there is no entry.
    pub fn parent_of(&self, path: &StreamPath) -> Option<Option<&StreamPath>> {
        let parents = self.parents_by_stream.as_ref()?;
        parents
            .get(path)
            .or_else(|| {
                parents
                    .iter()
                    .find(|(key, _)| key.matches(path))
                    .map(|(_, parent)| parent)
            })
            .map(Option::as_ref)
    }

    /// Rule diff over every stream, visited in path order.
    pub fn diff(&self, newer: &Snapshot) -> SnapshotDiff {
        let streams: BTreeSet<&StreamPath> = self
            .rules_by_stream
            .keys()
            .chain(newer.rules_by_stream.keys())
            .collect();

        let mut diff = SnapshotDiff::default();
        for stream in streams {
            diff.extend(self.diff_stream(newer, stream));
        }
        diff
    }

    /// Rule diff for a single stream.
    pub fn diff_stream(&self, newer: &Snapshot, stream: &StreamPath) -> SnapshotDiff {
        let old = self.rules_for(stream).map(Vec::as_slice).unwrap_or(&[]);
        let new = newer.rules_for(stream).map(Vec::as_slice).unwrap_or(&[]);
        diff_rules(old, new)
    }

    /// Write the snapshot's state back onto an in-memory hierarchy.
    ///
    /// Streams present in the snapshot get their local rules replaced;
    /// streams absent from it are left alone, so an older snapshot taken
    /// before a stream existed does not wipe that stream. Parent entries
    /// follow the same rule. Nothing is sent to the server.
    pub fn restore_into(&self, hierarchy: &mut StreamHierarchy) -> RestoreReport {
        let mut report = RestoreReport::default();
        let paths = hierarchy.paths();

        for path in &paths {
            match self.rules_for(path) {
                Some(rules) => {
                    // Both lookups go through the same index, so this cannot fail
                    if hierarchy.set_local_rules(path, rules.clone()).is_ok() {
                        report.rules_restored.push(path.clone());
                    }
                }
                None => report.untouched.push(path.clone()),
            }
        }

        if self.parents_by_stream.is_some() {
            let moves: Vec<(StreamPath, Option<StreamPath>)> = paths
                .iter()
                .filter_map(|path| Some((path.clone(), self.parent_of(path)?.cloned())))
                .collect();

            let skipped = hierarchy.reparent_many(&moves);
            for (path, reason) in &skipped {
                warn!(stream = %path, error = %reason, "Skipping parent restore");
            }
            report.parents_restored = moves
                .into_iter()
                .map(|(path, _)| path)
                .filter(|path| !skipped.iter().any(|(s, _)| s.matches(path)))
                .collect();
            report.skipped_parents = skipped;
        }

        info!(
            root = %hierarchy.root_path(),
            rules_restored = report.rules_restored.len(),
            parents_restored = report.parents_restored.len(),
            untouched = report.untouched.len(),
            "Snapshot restored onto hierarchy"
        );
        report
    }

    /// Pretty JSON in the snapshot file format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse snapshot file content.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedSnapshot(e.to_string()))
    }

    /// Parse snapshot file content from a string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes())
    }

    /// BLAKE3 digest of the compact JSON form, hex encoded.
    pub fn digest(&self) -> String {
        // Maps are ordered, so the compact encoding is canonical
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(blake3::hash(&bytes).as_bytes())
    }
}

/// Classify rule changes between two rule sets.
///
/// Rules are matched on `(kind, pattern)`. Order inside each set does not
/// affect the classification; repeated keys are paired in order of
/// appearance.
pub fn diff_rules(old: &[Rule], new: &[Rule]) -> SnapshotDiff {
    let mut pending: HashMap<(&str, &str), VecDeque<usize>> = HashMap::new();
    for (index, rule) in old.iter().enumerate() {
        pending.entry(rule.match_key()).or_default().push_back(index);
    }

    let mut matched = vec![false; old.len()];
    let mut diff = SnapshotDiff::default();

    for rule in new {
        let counterpart = pending
            .get_mut(&rule.match_key())
            .and_then(VecDeque::pop_front);
        match counterpart {
            Some(index) => {
                matched[index] = true;
                let previous = &old[index];
                if previous.remap_target() != rule.remap_target()
                    || !previous.owner().matches(rule.owner())
                {
                    diff.modified.push((previous.clone(), rule.clone()));
                }
            }
            None => diff.added.push(rule.clone()),
        }
    }

    diff.removed = old
        .iter()
        .zip(matched)
        .filter(|(_, matched)| !matched)
        .map(|(rule, _)| rule.clone())
        .collect();

    diff
}

/// A snapshot can seed a fresh hierarchy: records come from the parent
/// map (or the rule map when no parents were captured) and rules from the
/// rule map.
impl StreamSource for Snapshot {
    fn fetch_stream_record(&self, path: &StreamPath) -> Result<StreamRecord> {
        let known = self
            .rules_by_stream
            .keys()
            .chain(self.parents_by_stream.iter().flat_map(|p| p.keys()))
            .find(|key| key.matches(path))
            .ok_or_else(|| Error::stream_not_found(path.as_str()))?;

        let parent = self.parent_of(known).flatten().cloned();
        Ok(StreamRecord::new(known.clone(), parent))
    }

    fn fetch_all_stream_records(&self) -> Result<Vec<StreamRecord>> {
        let paths: BTreeSet<&StreamPath> = self
            .rules_by_stream
            .keys()
            .chain(self.parents_by_stream.iter().flat_map(|p| p.keys()))
            .collect();

        Ok(paths
            .into_iter()
            .map(|path| StreamRecord::new(path.clone(), self.parent_of(path).flatten().cloned()))
            .collect())
    }

    fn fetch_stream_rules(&self, path: &StreamPath) -> Result<Vec<Rule>> {
        Ok(self.rules_for(path).cloned().unwrap_or_default())
    }
}
