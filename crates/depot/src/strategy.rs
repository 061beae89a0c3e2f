//! Rule encoding strategies, keyed by server capability.
//!
//! Servers with an `Ignored` spec field store ignore rules there; older
//! servers only have `exclude` lines in `Paths`. The strategy is picked
//! once per connection from [`STRATEGY_TABLE`].

use crate::server::{PathEntry, PathKind, RemapEntry, ServerCapabilities, StreamSpec};
use serde::{Deserialize, Serialize};
use streamkeeper_core::{Rule, RuleKind};

/// How local rules map onto stream spec fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStrategy {
    /// `Remapped` + `Ignored` fields
    Native,
    /// `Remapped` + `exclude` lines in `Paths`
    LegacyPaths,
}

/// Row of the strategy table.
#[derive(Debug, Clone, Copy)]
pub struct StrategyEntry {
    pub min_server_year: u32,
    pub requires_ignored_field: bool,
    pub strategy: RuleStrategy,
}

/// Checked top to bottom; the last row matches every server.
pub const STRATEGY_TABLE: &[StrategyEntry] = &[
    StrategyEntry {
        min_server_year: 2016,
        requires_ignored_field: true,
        strategy: RuleStrategy::Native,
    },
    StrategyEntry {
        min_server_year: 0,
        requires_ignored_field: false,
        strategy: RuleStrategy::LegacyPaths,
    },
];

impl RuleStrategy {
    /// Pick the first table row the server satisfies.
    pub fn select(capabilities: &ServerCapabilities) -> Self {
        STRATEGY_TABLE
            .iter()
            .find(|entry| {
                capabilities.server_year >= entry.min_server_year
                    && (!entry.requires_ignored_field || capabilities.supports_ignored_field)
            })
            .map(|entry| entry.strategy)
            .unwrap_or(RuleStrategy::LegacyPaths)
    }

    /// Write `rules` into the spec's rule fields.
    ///
    /// Remaps always go to `Remapped`. In native mode `exclude` lines that
    /// duplicate an ignore rule are dropped so each rule has exactly one
    /// representation; legacy mode owns every `exclude` line.
    pub fn encode(&self, spec: &mut StreamSpec, rules: &[Rule]) {
        spec.remapped = rules
            .iter()
            .filter_map(|rule| {
                rule.remap_target().map(|target| RemapEntry {
                    from: rule.pattern().to_string(),
                    to: target.to_string(),
                })
            })
            .collect();

        let ignored: Vec<String> = rules
            .iter()
            .filter(|rule| matches!(rule.kind(), RuleKind::Ignore))
            .map(|rule| rule.pattern().to_string())
            .collect();

        match self {
            RuleStrategy::Native => {
                spec.paths.retain(|entry| {
                    entry.kind != PathKind::Exclude || !ignored.contains(&entry.path)
                });
                spec.ignored = ignored;
            }
            RuleStrategy::LegacyPaths => {
                spec.paths.retain(|entry| entry.kind != PathKind::Exclude);
                spec.paths.extend(
                    ignored
                        .into_iter()
                        .map(|path| PathEntry::new(PathKind::Exclude, path)),
                );
            }
        }
    }

    /// Read the spec's rule fields back as rules owned by the stream.
    pub fn decode(&self, spec: &StreamSpec) -> Vec<Rule> {
        let owner = &spec.stream;
        let mut rules: Vec<Rule> = spec
            .remapped
            .iter()
            .map(|entry| Rule::remap(entry.from.clone(), entry.to.clone(), owner.clone()))
            .collect();

        match self {
            RuleStrategy::Native => rules.extend(
                spec.ignored
                    .iter()
                    .map(|pattern| Rule::ignore(pattern.clone(), owner.clone())),
            ),
            RuleStrategy::LegacyPaths => rules.extend(
                spec.paths
                    .iter()
                    .filter(|entry| entry.kind == PathKind::Exclude)
                    .map(|entry| Rule::ignore(entry.path.clone(), owner.clone())),
            ),
        }

        rules
    }
}
