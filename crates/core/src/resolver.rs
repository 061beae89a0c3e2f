//! Local / inherited rule views.

use crate::error::Result;
use crate::hierarchy::StreamHierarchy;
use crate::rule::{ResolvedRule, Rule};
use crate::types::StreamPath;

/// Read-only rule views over a hierarchy.
///
/// No de-duplication happens here: a descendant repeating an ancestor's
/// rule sees both copies, each tagged with its own provenance.
#[derive(Debug, Clone, Copy)]
pub struct RuleResolver<'a> {
    hierarchy: &'a StreamHierarchy,
}

impl<'a> RuleResolver<'a> {
    pub fn new(hierarchy: &'a StreamHierarchy) -> Self {
        Self { hierarchy }
    }

    /// Rules defined on the node itself, in order.
    pub fn local_rules(&self, path: &StreamPath) -> Result<Vec<ResolvedRule<'a>>> {
        let node = self.hierarchy.get(path)?;
        Ok(node
            .local_rules
            .iter()
            .map(|rule| tag(rule, &node.path))
            .collect())
    }

    /// Rules of every strict ancestor, nearest ancestor first.
    pub fn inherited_rules(&self, path: &StreamPath) -> Result<Vec<ResolvedRule<'a>>> {
        let node = self.hierarchy.get(path)?;
        let mut inherited = Vec::new();

        for ancestor in self.hierarchy.ancestors(path)? {
            inherited.extend(
                ancestor
                    .local_rules
                    .iter()
                    .filter(|rule| !rule.owner().matches(&node.path))
                    .map(|rule| tag(rule, &node.path)),
            );
        }

        Ok(inherited)
    }

    /// Local rules followed by inherited rules.
    pub fn all_rules(&self, path: &StreamPath) -> Result<Vec<ResolvedRule<'a>>> {
        let mut rules = self.local_rules(path)?;
        rules.extend(self.inherited_rules(path)?);
        Ok(rules)
    }
}

fn tag<'a>(rule: &'a Rule, node: &StreamPath) -> ResolvedRule<'a> {
    ResolvedRule {
        rule,
        is_local: rule.owner().matches(node),
    }
}

impl StreamHierarchy {
    /// Rule views over this hierarchy.
    pub fn resolver(&self) -> RuleResolver<'_> {
        RuleResolver::new(self)
    }
}
