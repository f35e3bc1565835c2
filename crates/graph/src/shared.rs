use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::store::KnowledgeGraph;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide handle to a project's graph with single-writer semantics.
///
/// Readers take the last committed graph as an `Arc` and never block each
/// other. Writers are serialized through one mutex, work on a private copy
/// and publish it with a pointer swap, so a failed mutation leaves nothing
/// behind and no reader ever observes a half-applied change.
pub struct SharedGraph {
    current: RwLock<Arc<KnowledgeGraph>>,
    writer: Mutex<()>,
    write_timeout: Duration,
    generation: AtomicU64,
    restore_epoch: AtomicU64,
}

impl SharedGraph {
    pub fn new(graph: KnowledgeGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
            writer: Mutex::new(()),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            generation: AtomicU64::new(0),
            restore_epoch: AtomicU64::new(0),
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Last committed state.
    pub fn snapshot(&self) -> Arc<KnowledgeGraph> {
        self.current.read().clone()
    }

    /// Number of committed mutations since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of restores since creation.
    pub fn restore_epoch(&self) -> u64 {
        self.restore_epoch.load(Ordering::SeqCst)
    }

    fn acquire_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer.try_lock_for(self.write_timeout).ok_or_else(|| {
            GraphError::Concurrency(format!(
                "write lock not acquired within {}ms",
                self.write_timeout.as_millis()
            ))
        })
    }

    /// Apply `f` as one atomic mutation. The change is published only if `f`
    /// succeeds.
    pub fn mutate<T, E>(
        &self,
        f: impl FnOnce(&mut KnowledgeGraph) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<GraphError>,
    {
        let _guard = self.acquire_writer()?;
        self.apply(f)
    }

    /// Like [`SharedGraph::mutate`], but refuses to run when a restore has
    /// happened since `expected_epoch` was observed.
    pub fn mutate_at_epoch<T, E>(
        &self,
        expected_epoch: u64,
        f: impl FnOnce(&mut KnowledgeGraph) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<GraphError>,
    {
        let _guard = self.acquire_writer()?;
        let epoch = self.restore_epoch();
        if epoch != expected_epoch {
            let reason = format!(
                "graph restored while a change was pending (epoch {expected_epoch} -> {epoch})"
            );
            return Err(GraphError::Concurrency(reason).into());
        }
        self.apply(f)
    }

    fn apply<T, E>(
        &self,
        f: impl FnOnce(&mut KnowledgeGraph) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let mut working = KnowledgeGraph::clone(&self.snapshot());
        let out = f(&mut working)?;
        *self.current.write() = Arc::new(working);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Graph mutation committed");
        Ok(out)
    }

    /// Swap in a fully built graph, replacing the live one.
    pub fn restore(&self, graph: KnowledgeGraph) -> Result<()> {
        let _guard = self.acquire_writer()?;
        let entities = graph.entity_count();
        let relationships = graph.relationship_count();
        *self.current.write() = Arc::new(graph);
        self.generation.fetch_add(1, Ordering::SeqCst);
        let epoch = self.restore_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!(epoch, entities, relationships, "Graph restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, NewEntity, NewRelationship};
    use crate::relation::RelationType;
    use std::thread;

    #[test]
    fn test_failed_mutation_is_not_published() {
        let shared = SharedGraph::new(KnowledgeGraph::new("novel"));
        let before = shared.snapshot();

        let result: Result<()> = shared.mutate(|g| {
            let a = g.add_entity(NewEntity::new("Mickey", EntityType::Character))?;
            let missing = crate::EntityId::new();
            g.add_relationship(NewRelationship::new(a, missing, RelationType::Knows))?;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(*shared.snapshot(), *before);
        assert_eq!(shared.generation(), 0);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let shared = SharedGraph::new(KnowledgeGraph::new("novel"));
        let reader_view = shared.snapshot();

        shared
            .mutate(|g| g.add_entity(NewEntity::new("Noni", EntityType::Character)))
            .unwrap();

        assert_eq!(reader_view.entity_count(), 0);
        assert_eq!(shared.snapshot().entity_count(), 1);
        assert_eq!(shared.generation(), 1);
    }

    #[test]
    fn test_write_lock_timeout() {
        let shared = Arc::new(
            SharedGraph::new(KnowledgeGraph::new("novel"))
                .with_write_timeout(Duration::from_millis(20)),
        );
        let holder = shared.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let _ = holder.mutate(|_| {
                tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok::<_, GraphError>(())
            });
        });

        rx.recv().unwrap();
        let err = shared
            .mutate(|g| g.add_entity(NewEntity::new("Sam", EntityType::Character)))
            .unwrap_err();
        assert!(matches!(err, GraphError::Concurrency(_)));

        release_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_restore_fences_stale_writers() {
        let shared = SharedGraph::new(KnowledgeGraph::new("novel"));
        let epoch = shared.restore_epoch();

        shared.restore(KnowledgeGraph::new("novel")).unwrap();
        assert_eq!(shared.restore_epoch(), epoch + 1);

        let sam = || NewEntity::new("Sam", EntityType::Character);
        let err = shared
            .mutate_at_epoch(epoch, |g| g.add_entity(sam()))
            .unwrap_err();
        assert!(matches!(err, GraphError::Concurrency(_)));
        assert!(shared.snapshot().is_empty());

        shared
            .mutate_at_epoch(epoch + 1, |g| g.add_entity(sam()))
            .unwrap();
        assert_eq!(shared.snapshot().entity_count(), 1);
    }
}
