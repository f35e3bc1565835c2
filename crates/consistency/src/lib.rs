//! Heuristic story-consistency checks over a committed graph.

pub mod checks;
pub mod issue;

pub use issue::{ConsistencyReport, Issue, IssueKind, Severity, SeverityCounts};

use serde::{Deserialize, Serialize};
use tracing::debug;

use graph::KnowledgeGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Scenes an open plot thread may go untouched.
    pub dropped_thread_gap: u32,
    pub absence_min_mentions: u32,
    pub absence_gap: u32,
    pub flat_arc_min_appearances: usize,
    pub flat_arc_variance: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            dropped_thread_gap: 10,
            absence_min_mentions: 3,
            absence_gap: 8,
            flat_arc_min_appearances: 5,
            flat_arc_variance: 0.01,
        }
    }
}

pub struct ConsistencyChecker {
    config: ConsistencyConfig,
}

impl ConsistencyChecker {
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsistencyConfig {
        &self.config
    }

    /// Run every check. `position` defaults to the latest scene in the graph.
    pub fn check(&self, kg: &KnowledgeGraph, position: Option<u32>) -> ConsistencyReport {
        let position = position.or_else(|| kg.latest_scene()).unwrap_or(0);

        let mut issues = checks::dropped_threads(kg, &self.config, position);
        issues.extend(checks::character_absences(kg, &self.config, position));
        issues.extend(checks::timeline_errors(kg));
        issues.extend(checks::flat_arcs(kg, &self.config));
        issues.extend(checks::orphaned_entities(kg));

        let report = ConsistencyReport::new(position, issues);
        debug!(
            position,
            errors = report.counts.error,
            warnings = report.counts.warning,
            info = report.counts.info,
            "Consistency check finished"
        );
        report
    }
}

impl Default for ConsistencyChecker {
    fn default() -> Self {
        Self::new(ConsistencyConfig::default())
    }
}
