//! Portable full-graph snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{GraphError, Result};
use crate::model::{Entity, Relationship};
use crate::store::KnowledgeGraph;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub format_version: u32,
    pub project_id: String,
    pub updated_at: DateTime<Utc>,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl GraphSnapshot {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }
}

impl KnowledgeGraph {
    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            project_id: self.project_id().to_string(),
            updated_at: self.updated_at(),
            entities: self.entities().cloned().collect(),
            relationships: self.relationships().cloned().collect(),
        }
    }

    /// Build a new graph from a snapshot. The snapshot is fully validated
    /// (no duplicate ids, no dangling endpoints) before anything is returned.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(GraphError::validation(format!(
                "unsupported snapshot format version {}",
                snapshot.format_version
            )));
        }
        Self::from_parts(
            snapshot.project_id,
            snapshot.updated_at,
            snapshot.entities,
            snapshot.relationships,
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot)
    }

    /// Write the graph to `path`, replacing any previous file only once the
    /// new content is fully written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;

        info!(
            path = %path.display(),
            entities = self.entity_count(),
            relationships = self.relationship_count(),
            "Graph snapshot saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityId, EntityType, NewEntity, NewRelationship, SceneRef};
    use crate::relation::RelationType;

    fn sample_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new("novel");
        let mickey = graph
            .add_entity(
                NewEntity::new("Mickey Bardot", EntityType::Character)
                    .description("Detective, sixth floor")
                    .scene(SceneRef::new("s1", 1))
                    .attribute("age", 41.0)
                    .attribute("nickname", "The Hound")
                    .verified(),
            )
            .unwrap();
        let fire = graph
            .add_entity(
                NewEntity::new("The Warehouse Fire", EntityType::Event)
                    .scene(SceneRef::new("s2", 2))
                    .attribute("plot_thread", "open"),
            )
            .unwrap();
        graph
            .modify_entity(mickey, |e| {
                e.add_alias("Mick");
                e.record_appearance(&SceneRef::new("s3", 3));
                e.annotate(Some("s3"), "age reported as 40");
            })
            .unwrap();
        graph
            .add_relationship(NewRelationship {
                context: vec!["He watched it burn.".into()],
                description: "witnessed the fire".into(),
                ..NewRelationship::new(mickey, fire, RelationType::Witnesses)
                    .scene(SceneRef::new("s2", 2))
                    .valence(-0.7)
                    .strength(0.9)
            })
            .unwrap();
        graph
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let graph = sample_graph();
        let json = graph.to_json().unwrap();
        let restored = KnowledgeGraph::from_json(&json).unwrap();

        assert_eq!(restored, graph);
        assert_eq!(restored.metadata(), graph.metadata());

        // Derived indexes are rebuilt too.
        let rel = graph.relationships().next().unwrap();
        assert_eq!(
            restored.find_relationship_by_key(&rel.content_key).map(|r| r.id),
            Some(rel.id)
        );
        assert_eq!(restored.degree(rel.source), 1);
    }

    #[test]
    fn test_dangling_snapshot_rejected() {
        let graph = sample_graph();
        let mut snapshot = graph.to_snapshot();
        snapshot.relationships[0].target = EntityId::new();
        let err = KnowledgeGraph::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_future_format_rejected() {
        let mut snapshot = sample_graph().to_snapshot();
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        assert!(KnowledgeGraph::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects").join("novel.json");
        let graph = sample_graph();

        graph.save(&path).unwrap();
        let loaded = KnowledgeGraph::load(&path).unwrap();
        assert_eq!(loaded, graph);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
