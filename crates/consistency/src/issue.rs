use serde::{Deserialize, Serialize};
use std::fmt;

use graph::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth a look, probably intentional
    Info,
    /// Likely oversight
    Warning,
    /// Contradiction in the committed graph
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DroppedThread,
    CharacterAbsence,
    TimelineError,
    FlatArc,
    OrphanedEntity,
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::TimelineError => Severity::Error,
            Self::DroppedThread | Self::CharacterAbsence => Severity::Warning,
            Self::FlatArc | Self::OrphanedEntity => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub entity_id: EntityId,
    pub entity_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<EntityId>,
    pub message: String,
    pub suggestion: String,
}

impl Issue {
    pub fn new(
        kind: IssueKind,
        entity_id: EntityId,
        entity_name: &str,
        message: String,
        suggestion: String,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            entity_id,
            entity_name: entity_name.to_string(),
            related_entity_id: None,
            message,
            suggestion,
        }
    }

    pub fn related(mut self, id: EntityId) -> Self {
        self.related_entity_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Scene sequence the checks were run against.
    pub position: u32,
    pub counts: SeverityCounts,
    pub issues: Vec<Issue>,
}

impl ConsistencyReport {
    /// Sorts issues (most severe first, then kind, then entity name) and
    /// tallies them.
    pub fn new(position: u32, mut issues: Vec<Issue>) -> Self {
        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.entity_name.cmp(&b.entity_name))
                .then(a.entity_id.cmp(&b.entity_id))
        });

        let mut counts = SeverityCounts::default();
        for issue in &issues {
            match issue.severity {
                Severity::Error => counts.error += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Info => counts.info += 1,
            }
        }

        Self {
            position,
            counts,
            issues,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}
