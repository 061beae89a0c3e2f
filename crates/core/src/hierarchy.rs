//! Stream hierarchy and its builder.
//!
//! A [`StreamHierarchy`] owns every [`StreamNode`] in a path-keyed index.
//! Child lists are the ownership edges; `parent_path` is a lookup key only,
//! which keeps re-parenting a plain data edit and rules out reference
//! cycles.

use crate::error::{Error, Result};
use crate::rule::{Rule, RuleKind};
use crate::types::StreamPath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Stream record as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub path: StreamPath,
    pub name: String,
    pub parent: Option<StreamPath>,
    /// Server stream type (`mainline`, `development`, `release`, ...)
    pub stream_type: String,
}

impl StreamRecord {
    pub fn new(path: impl Into<StreamPath>, parent: Option<StreamPath>) -> Self {
        let path = path.into();
        Self {
            name: path.name().to_string(),
            path,
            parent,
            stream_type: "development".to_string(),
        }
    }
}

/// Read access to stream records and their rules.
pub trait StreamSource {
    /// Fetch one stream record.
    fn fetch_stream_record(&self, path: &StreamPath) -> Result<StreamRecord>;

    /// Fetch every stream record visible to the caller.
    fn fetch_all_stream_records(&self) -> Result<Vec<StreamRecord>>;

    /// Fetch the rules defined locally on a stream.
    fn fetch_stream_rules(&self, path: &StreamPath) -> Result<Vec<Rule>>;
}

/// One stream in the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNode {
    pub path: StreamPath,
    pub name: String,
    pub parent_path: Option<StreamPath>,
    pub local_rules: Vec<Rule>,
    pub children: Vec<StreamPath>,
}

impl StreamNode {
    pub fn new(path: impl Into<StreamPath>, parent_path: Option<StreamPath>) -> Self {
        let path = path.into();
        Self {
            name: path.name().to_string(),
            path,
            parent_path,
            local_rules: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn from_record(record: &StreamRecord) -> Self {
        Self {
            path: record.path.clone(),
            name: record.name.clone(),
            parent_path: record.parent.clone(),
            local_rules: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.local_rules = rules;
        self
    }
}

/// Single-rooted tree of streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHierarchy {
    root: StreamPath,
    nodes: BTreeMap<String, StreamNode>,
}

impl StreamHierarchy {
    /// Start a hierarchy from its root node.
    pub fn new(mut root: StreamNode) -> Self {
        root.children.clear();
        let path = root.path.clone();
        let mut nodes = BTreeMap::new();
        nodes.insert(path.key(), root);
        Self { root: path, nodes }
    }

    pub fn root_path(&self) -> &StreamPath {
        &self.root
    }

    pub fn root(&self) -> &StreamNode {
        // The root entry is inserted at construction and never removed
        &self.nodes[&self.root.key()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &StreamPath) -> bool {
        self.nodes.contains_key(&path.key())
    }

    pub fn node(&self, path: &StreamPath) -> Option<&StreamNode> {
        self.nodes.get(&path.key())
    }

    /// Like [`node`](Self::node) but errors on unknown streams.
    pub fn get(&self, path: &StreamPath) -> Result<&StreamNode> {
        self.node(path)
            .ok_or_else(|| Error::StreamNotFound(path.to_string()))
    }

    fn get_mut(&mut self, path: &StreamPath) -> Result<&mut StreamNode> {
        self.nodes
            .get_mut(&path.key())
            .ok_or_else(|| Error::StreamNotFound(path.to_string()))
    }

    /// Attach a new node below an existing parent.
    pub fn attach(&mut self, mut node: StreamNode, parent: &StreamPath) -> Result<()> {
        if self.contains(&node.path) {
            return Err(Error::InvalidHierarchy(format!(
                "{} is already part of the hierarchy",
                node.path
            )));
        }
        let parent_path = self.get(parent)?.path.clone();

        node.parent_path = Some(parent_path.clone());
        node.children.clear();
        let child_path = node.path.clone();
        self.nodes.insert(child_path.key(), node);
        self.get_mut(&parent_path)?.children.push(child_path);
        Ok(())
    }

    /// Strict ancestors of `path`, nearest first.
    pub fn ancestors(&self, path: &StreamPath) -> Result<Vec<&StreamNode>> {
        let mut current = self.get(path)?;
        let mut ancestors = Vec::new();

        while let Some(parent) = current.parent_path.as_ref().and_then(|p| self.node(p)) {
            // A corrupted parent chain must not loop forever
            if ancestors.len() >= self.nodes.len() {
                return Err(Error::InvalidHierarchy(format!(
                    "parent chain of {} does not terminate",
                    path
                )));
            }
            ancestors.push(parent);
            current = parent;
        }

        Ok(ancestors)
    }

    /// True when `candidate` lies strictly below `ancestor`.
    pub fn is_descendant(&self, candidate: &StreamPath, ancestor: &StreamPath) -> bool {
        self.ancestors(candidate)
            .map(|chain| chain.iter().any(|node| node.path.matches(ancestor)))
            .unwrap_or(false)
    }

    /// Every node reachable from the root, depth-first, parents before
    /// children.
    pub fn walk(&self) -> Vec<&StreamNode> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];

        while let Some(node) = stack.pop() {
            visited.push(node);
            for child in node.children.iter().rev() {
                if let Some(child) = self.node(child) {
                    stack.push(child);
                }
            }
        }

        visited
    }

    /// Paths of every reachable node in walk order.
    pub fn paths(&self) -> Vec<StreamPath> {
        self.walk().into_iter().map(|n| n.path.clone()).collect()
    }

    /// Move a node under a different parent.
    ///
    /// The root may only point at streams outside the hierarchy. Any other
    /// node needs a parent inside the hierarchy that is not itself or one of
    /// its descendants.
    pub fn reparent(&mut self, path: &StreamPath, new_parent: Option<&StreamPath>) -> Result<()> {
        let node_path = self.get(path)?.path.clone();

        if node_path.matches(&self.root) {
            if let Some(parent) = new_parent {
                if self.contains(parent) {
                    return Err(Error::InvalidHierarchy(format!(
                        "root {} cannot move below {}",
                        node_path, parent
                    )));
                }
            }
            self.get_mut(&node_path)?.parent_path = new_parent.cloned();
            return Ok(());
        }

        let new_parent = new_parent.ok_or_else(|| {
            Error::InvalidHierarchy(format!("{} would be detached from the hierarchy", node_path))
        })?;
        let new_parent = self.get(new_parent)?.path.clone();
        if new_parent.matches(&node_path) || self.is_descendant(&new_parent, &node_path) {
            return Err(Error::InvalidHierarchy(format!(
                "{} cannot move below its own descendant {}",
                node_path, new_parent
            )));
        }

        let old_parent = self.get(&node_path)?.parent_path.clone();
        if let Some(old) = old_parent.as_ref() {
            if old.matches(&new_parent) {
                return Ok(());
            }
            if let Some(old_node) = self.nodes.get_mut(&old.key()) {
                old_node.children.retain(|c| !c.matches(&node_path));
            }
        }

        self.get_mut(&new_parent)?.children.push(node_path.clone());
        self.get_mut(&node_path)?.parent_path = Some(new_parent.clone());
        debug!(stream = %node_path, parent = %new_parent, "Stream re-parented");
        Ok(())
    }

    /// Re-link several streams at once.
    ///
    /// Cycles are checked against the final assignment, so a batch may
    /// invert existing nesting. Moves that name an unknown stream, detach a
    /// non-root stream, or close a cycle in the final assignment are
    /// refused and returned with the reason; the rest are applied.
    pub fn reparent_many(
        &mut self,
        moves: &[(StreamPath, Option<StreamPath>)],
    ) -> Vec<(StreamPath, String)> {
        let mut skipped = Vec::new();
        let mut target: HashMap<String, String> = self
            .nodes
            .values()
            .filter(|node| !node.path.matches(&self.root))
            .filter_map(|node| Some((node.path.key(), node.parent_path.as_ref()?.key())))
            .collect();
        let mut accepted: BTreeMap<String, (StreamPath, StreamPath)> = BTreeMap::new();
        let mut root_parent = None;

        for (path, parent) in moves {
            let Some(node) = self.node(path) else {
                skipped.push((path.clone(), Error::StreamNotFound(path.to_string()).to_string()));
                continue;
            };
            let node_path = node.path.clone();

            if node_path.matches(&self.root) {
                match parent {
                    Some(parent) if self.contains(parent) => skipped.push((
                        node_path.clone(),
                        Error::InvalidHierarchy(format!(
                            "root {} cannot move below {}",
                            node_path, parent
                        ))
                        .to_string(),
                    )),
                    _ => root_parent = Some(parent.clone()),
                }
                continue;
            }

            let refusal = match parent.as_ref().map(|p| self.node(p)) {
                None => Some(Error::InvalidHierarchy(format!(
                    "{} would be detached from the hierarchy",
                    node_path
                ))),
                Some(None) => parent
                    .as_ref()
                    .map(|p| Error::StreamNotFound(p.to_string())),
                Some(Some(parent_node)) if parent_node.path.matches(&node_path) => {
                    Some(Error::InvalidHierarchy(format!(
                        "{} cannot move below itself",
                        node_path
                    )))
                }
                Some(Some(parent_node)) => {
                    target.insert(node_path.key(), parent_node.path.key());
                    accepted.insert(node_path.key(), (node_path.clone(), parent_node.path.clone()));
                    None
                }
            };
            if let Some(err) = refusal {
                skipped.push((node_path, err.to_string()));
            }
        }

        // The live tree is acyclic, so every cycle contains an accepted move
        while let Some(cycle) = find_cycle(&target) {
            let mut reverted = false;
            for key in cycle {
                let Some((path, parent)) = accepted.remove(&key) else {
                    continue;
                };
                if let Some(current) = self.nodes.get(&key).and_then(|n| n.parent_path.as_ref()) {
                    target.insert(key, current.key());
                }
                skipped.push((
                    path.clone(),
                    Error::InvalidHierarchy(format!(
                        "{} cannot move below its own descendant {}",
                        path, parent
                    ))
                    .to_string(),
                ));
                reverted = true;
            }
            if !reverted {
                break;
            }
        }

        for (path, parent) in accepted.into_values() {
            self.relink(&path, &parent);
        }
        if let Some(parent) = root_parent {
            if let Some(root) = self.nodes.get_mut(&self.root.key()) {
                root.parent_path = parent;
            }
        }
        skipped
    }

    /// Move a node's edge without any structural checks.
    fn relink(&mut self, path: &StreamPath, parent: &StreamPath) {
        let old_parent = self.nodes.get(&path.key()).and_then(|n| n.parent_path.clone());
        if let Some(old) = old_parent.as_ref() {
            if old.matches(parent) {
                return;
            }
            if let Some(old_node) = self.nodes.get_mut(&old.key()) {
                old_node.children.retain(|c| !c.matches(path));
            }
        }
        if let Some(parent_node) = self.nodes.get_mut(&parent.key()) {
            parent_node.children.push(path.clone());
        }
        if let Some(node) = self.nodes.get_mut(&path.key()) {
            node.parent_path = Some(parent.clone());
        }
        debug!(stream = %path, parent = %parent, "Stream re-parented");
    }

    /// Append a rule owned by `path`.
    pub fn add_rule(
        &mut self,
        path: &StreamPath,
        kind: RuleKind,
        pattern: impl Into<String>,
    ) -> Result<&Rule> {
        let node = self.get_mut(path)?;
        let rule = Rule::new(kind, pattern, node.path.clone());
        node.local_rules.push(rule);
        Ok(&node.local_rules[node.local_rules.len() - 1])
    }

    /// Remove the local rule at `index`.
    pub fn remove_rule(&mut self, path: &StreamPath, index: usize) -> Result<Rule> {
        let node = self.get_mut(path)?;
        if index >= node.local_rules.len() {
            return Err(Error::InvalidHierarchy(format!(
                "{} has no local rule at index {}",
                node.path, index
            )));
        }
        Ok(node.local_rules.remove(index))
    }

    /// Replace the local rule at `index`, returning the previous one.
    pub fn replace_rule(
        &mut self,
        path: &StreamPath,
        index: usize,
        kind: RuleKind,
        pattern: impl Into<String>,
    ) -> Result<Rule> {
        let node = self.get_mut(path)?;
        let owner = node.path.clone();
        let slot = node.local_rules.get_mut(index).ok_or_else(|| {
            Error::InvalidHierarchy(format!("{} has no local rule at index {}", owner, index))
        })?;
        Ok(std::mem::replace(slot, Rule::new(kind, pattern, owner)))
    }

    /// Overwrite a node's local rules wholesale.
    pub fn set_local_rules(&mut self, path: &StreamPath, rules: Vec<Rule>) -> Result<()> {
        self.get_mut(path)?.local_rules = rules;
        Ok(())
    }
}

/// First cycle found in a child-key to parent-key map, as the keys on it.
fn find_cycle(parents: &HashMap<String, String>) -> Option<Vec<String>> {
    let mut settled: HashSet<&str> = HashSet::new();
    for start in parents.keys() {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = start.as_str();
        while !settled.contains(current) {
            if let Some(pos) = chain.iter().position(|key| *key == current) {
                return Some(chain[pos..].iter().map(|key| key.to_string()).collect());
            }
            chain.push(current);
            match parents.get(current) {
                Some(parent) => current = parent.as_str(),
                None => break,
            }
        }
        settled.extend(chain);
    }
    None
}

/// Builds a [`StreamHierarchy`] from a [`StreamSource`].
pub struct HierarchyBuilder<'a, S: StreamSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: StreamSource + ?Sized> HierarchyBuilder<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Build the subtree rooted at `root`.
    ///
    /// Only the root record and the record listing are fatal. A stream whose
    /// rules cannot be fetched is attached with no local rules, and records
    /// whose parent is outside the subtree are never attached.
    pub fn build(&self, root: &StreamPath) -> Result<StreamHierarchy> {
        let root_record = self.source.fetch_stream_record(root)?;
        let records = self.source.fetch_all_stream_records()?;

        let mut by_parent: HashMap<String, Vec<&StreamRecord>> = HashMap::new();
        for record in &records {
            if let Some(parent) = &record.parent {
                by_parent.entry(parent.key()).or_default().push(record);
            }
        }

        let root_node =
            StreamNode::from_record(&root_record).with_rules(self.load_rules(&root_record.path));
        let mut hierarchy = StreamHierarchy::new(root_node);
        let mut attached: HashSet<String> = HashSet::new();
        attached.insert(root_record.path.key());

        self.attach_children(&mut hierarchy, &by_parent, &root_record.path, &mut attached)?;

        let unattached = records
            .iter()
            .filter(|r| !attached.contains(&r.path.key()))
            .count();
        info!(
            root = %root_record.path,
            streams = hierarchy.len(),
            unattached,
            "Stream hierarchy built"
        );
        Ok(hierarchy)
    }

    fn attach_children(
        &self,
        hierarchy: &mut StreamHierarchy,
        by_parent: &HashMap<String, Vec<&StreamRecord>>,
        parent: &StreamPath,
        attached: &mut HashSet<String>,
    ) -> Result<()> {
        let Some(children) = by_parent.get(&parent.key()) else {
            return Ok(());
        };

        for record in children {
            if !attached.insert(record.path.key()) {
                debug!(stream = %record.path, "Skipping stream already in hierarchy");
                continue;
            }
            let node = StreamNode::from_record(record).with_rules(self.load_rules(&record.path));
            hierarchy.attach(node, parent)?;
            self.attach_children(hierarchy, by_parent, &record.path, attached)?;
        }

        Ok(())
    }

    fn load_rules(&self, path: &StreamPath) -> Vec<Rule> {
        match self.source.fetch_stream_rules(path) {
            Ok(rules) => rules
                .into_iter()
                .map(|rule| {
                    if rule.owner().matches(path) {
                        rule
                    } else {
                        rule.with_owner(path.clone())
                    }
                })
                .collect(),
            Err(err) => {
                warn!(
                    stream = %path,
                    error = %err,
                    "Failed to fetch stream rules; attaching with no local rules"
                );
                Vec::new()
            }
        }
    }
}

/// Convenience wrapper around [`HierarchyBuilder::build`].
pub fn build_hierarchy<S: StreamSource + ?Sized>(
    source: &S,
    root: &StreamPath,
) -> Result<StreamHierarchy> {
    HierarchyBuilder::new(source).build(root)
}
