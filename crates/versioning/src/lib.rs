//! Named checkpoints of a project's graph, diffs between them, and rollback.

pub mod checkpoint;
pub mod diff;
pub mod error;

pub use checkpoint::{Checkpoint, CheckpointId, CheckpointStats, CheckpointStore, CheckpointSummary};
pub use diff::{EntityChange, EntitySummary, GraphDiff, RelationshipSummary, diff_snapshots};
pub use error::{Result, VersionError};

use std::sync::Arc;
use tracing::{info, instrument};

use graph::{KnowledgeGraph, SharedGraph};

/// Checkpoint operations against one live graph.
pub struct VersionControl {
    graph: Arc<SharedGraph>,
    store: CheckpointStore,
}

impl VersionControl {
    pub fn new(graph: Arc<SharedGraph>, store: CheckpointStore) -> Self {
        Self { graph, store }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Capture the last committed graph state.
    pub fn create(&self, label: &str, description: &str) -> Result<CheckpointSummary> {
        let snapshot = self.graph.snapshot();
        let summary = self.store.insert(Checkpoint::capture(&snapshot, label, description))?;
        info!(
            checkpoint = %summary.id,
            label,
            entities = summary.stats.entity_count,
            relationships = summary.stats.relationship_count,
            "Checkpoint created"
        );
        Ok(summary)
    }

    pub fn list(&self) -> Vec<CheckpointSummary> {
        self.store.list()
    }

    pub fn get(&self, id: CheckpointId) -> Result<Arc<Checkpoint>> {
        self.store.get(id)
    }

    pub fn delete(&self, id: CheckpointId) -> Result<CheckpointSummary> {
        let summary = self.store.remove(id)?;
        info!(checkpoint = %id, label = %summary.label, "Checkpoint deleted");
        Ok(summary)
    }

    /// Changes needed to go from checkpoint `from` to checkpoint `to`.
    pub fn diff(&self, from: CheckpointId, to: CheckpointId) -> Result<GraphDiff> {
        let from = self.store.get(from)?;
        let to = self.store.get(to)?;
        Ok(diff_snapshots(&from.snapshot, &to.snapshot))
    }

    /// Changes made to the live graph since checkpoint `id`.
    pub fn diff_against_live(&self, id: CheckpointId) -> Result<GraphDiff> {
        let checkpoint = self.store.get(id)?;
        let live = self.graph.snapshot().to_snapshot();
        Ok(diff_snapshots(&checkpoint.snapshot, &live))
    }

    /// Replace the live graph with the state captured in checkpoint `id`.
    ///
    /// The checkpoint is rebuilt and validated into a fresh graph first; the
    /// live graph is only swapped once that succeeds. Merges that were
    /// already pending are refused when they try to commit.
    #[instrument(skip(self), fields(checkpoint = %id))]
    pub fn rollback(&self, id: CheckpointId) -> Result<CheckpointSummary> {
        let checkpoint = self.store.get(id)?;
        let restored = KnowledgeGraph::from_snapshot(checkpoint.snapshot.clone())?;
        self.graph.restore(restored)?;
        info!(label = %checkpoint.label, "Rolled back to checkpoint");
        Ok(checkpoint.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::{EntityId, EntityType, NewEntity, NewRelationship, RelationType};
    use std::fs;

    fn setup() -> (Arc<SharedGraph>, VersionControl) {
        let graph = Arc::new(SharedGraph::new(KnowledgeGraph::new("novel")));
        let versions = VersionControl::new(graph.clone(), CheckpointStore::in_memory());
        (graph, versions)
    }

    fn add(graph: &SharedGraph, name: &str) -> EntityId {
        graph
            .mutate(|g| g.add_entity(NewEntity::new(name, EntityType::Character)))
            .unwrap()
    }

    #[test]
    fn test_rollback_restores_checkpointed_state() {
        let (graph, versions) = setup();
        let a = add(&graph, "A");
        let b = add(&graph, "B");
        graph
            .mutate(|g| g.add_relationship(NewRelationship::new(a, b, RelationType::Knows)))
            .unwrap();
        let checkpoint = versions.create("before", "two characters").unwrap();
        let expected = graph.snapshot().to_snapshot();

        add(&graph, "C");
        graph.mutate(|g| g.delete_entity(b)).unwrap();
        assert_eq!(graph.snapshot().entity_count(), 2);

        versions.rollback(checkpoint.id).unwrap();
        assert_eq!(graph.snapshot().to_snapshot(), expected);
        assert_eq!(graph.restore_epoch(), 1);
        assert!(versions.diff_against_live(checkpoint.id).unwrap().is_empty());
    }

    #[test]
    fn test_diff_between_checkpoints() {
        let (graph, versions) = setup();
        let a = add(&graph, "A");
        let b = add(&graph, "B");
        let rel = graph
            .mutate(|g| g.add_relationship(NewRelationship::new(a, b, RelationType::Knows)))
            .unwrap();
        let first = versions.create("first", "").unwrap();

        let c = add(&graph, "C");
        graph.mutate(|g| g.delete_relationship(rel)).unwrap();
        let second = versions.create("second", "").unwrap();

        let diff = versions.diff(first.id, second.id).unwrap();
        assert_eq!(diff.entities_added.len(), 1);
        assert_eq!(diff.entities_added[0].id, c);
        assert_eq!(diff.relationships_removed.len(), 1);
        assert_eq!(diff.relationships_removed[0].id, rel);
    }

    #[test]
    fn test_unknown_checkpoint() {
        let (_graph, versions) = setup();
        let missing = CheckpointId::new();
        assert!(matches!(versions.rollback(missing), Err(VersionError::CheckpointNotFound(_))));
        assert!(matches!(versions.delete(missing), Err(VersionError::CheckpointNotFound(_))));
    }

    #[test]
    fn test_corrupt_checkpoint_leaves_live_graph_untouched() {
        let dir = tempfile::tempdir().unwrap();

        let mut source = KnowledgeGraph::new("novel");
        let a = source.add_entity(NewEntity::new("A", EntityType::Character)).unwrap();
        let b = source.add_entity(NewEntity::new("B", EntityType::Character)).unwrap();
        source.add_relationship(NewRelationship::new(a, b, RelationType::Knows)).unwrap();
        let mut checkpoint = Checkpoint::capture(&source, "broken", "");
        checkpoint.snapshot.entities.retain(|e| e.id != b);
        fs::write(
            dir.path().join(format!("{}.json", checkpoint.id)),
            serde_json::to_string(&checkpoint).unwrap(),
        )
        .unwrap();

        let graph = Arc::new(SharedGraph::new(KnowledgeGraph::new("novel")));
        add(&graph, "Live");
        let before = graph.snapshot();
        let store = CheckpointStore::open(dir.path()).unwrap();
        let versions = VersionControl::new(graph.clone(), store);

        let err = versions.rollback(checkpoint.id).unwrap_err();
        assert!(matches!(err, VersionError::Graph(_)));
        assert!(Arc::ptr_eq(&before, &graph.snapshot()));
        assert_eq!(graph.restore_epoch(), 0);
    }
}
