use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use consistency::ConsistencyChecker;
use extract::{EntityResolver, Extractor, JobManager, OllamaExtractor};
use graph::{KnowledgeGraph, SharedGraph};
use versioning::{CheckpointStore, VersionControl};

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<SharedGraph>,
    pub jobs: JobManager,
    pub versions: Arc<VersionControl>,
    pub consistency: Arc<ConsistencyChecker>,
    pub config: Arc<AppConfig>,
    pub metrics: Arc<Metrics>,
    snapshot_path: Option<PathBuf>,
    save_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// State backed by the Ollama extractor from the configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let extractor = OllamaExtractor::new(&config.extractor.base_url, &config.extractor.model)
            .with_retry(config.retry_policy())
            .with_cost_per_1k_tokens(config.extractor.cost_per_1k_tokens);
        Self::new(config, Arc::new(extractor))
    }

    /// Load the project's graph and checkpoints (when persistence is on)
    /// and wire the services around it.
    pub fn new(config: AppConfig, extractor: Arc<dyn Extractor>) -> Result<Self> {
        let (graph, snapshot_path, store) = if config.storage.persist {
            let path = config.snapshot_path();
            let graph = if path.exists() {
                KnowledgeGraph::load(&path)
                    .with_context(|| format!("failed to load graph from {}", path.display()))?
            } else {
                KnowledgeGraph::new(config.storage.project_id.clone())
            };
            let store = CheckpointStore::open(config.checkpoint_dir())
                .context("failed to open checkpoint store")?;
            (graph, Some(path), store)
        } else {
            let graph = KnowledgeGraph::new(config.storage.project_id.clone());
            (graph, None, CheckpointStore::in_memory())
        };

        info!(
            project = %graph.project_id(),
            entities = graph.entity_count(),
            relationships = graph.relationship_count(),
            checkpoints = store.len(),
            "Project loaded"
        );

        let graph = Arc::new(SharedGraph::new(graph).with_write_timeout(config.write_timeout()));
        let jobs = JobManager::new(
            graph.clone(),
            extractor,
            EntityResolver::new(config.resolver),
            config.job_manager_config(),
        );
        let versions = Arc::new(VersionControl::new(graph.clone(), store));
        let consistency = Arc::new(ConsistencyChecker::new(config.consistency.clone()));

        Ok(Self {
            graph,
            jobs,
            versions,
            consistency,
            config: Arc::new(config),
            metrics: Metrics::new(),
            snapshot_path,
            save_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Apply one graph mutation off the async runtime, then save.
    pub async fn mutate<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut KnowledgeGraph) -> graph::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let graph = self.graph.clone();
        let out = blocking(move || graph.mutate(f).map_err(ApiError::from)).await?;
        self.persist().await;
        Ok(out)
    }

    /// Write the current graph to the snapshot file, if there is one.
    /// Failures are logged; the in-memory graph stays authoritative.
    pub async fn persist(&self) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let _guard = self.save_lock.lock().await;
        let graph = self.graph.snapshot();
        let saved = match tokio::task::spawn_blocking(move || graph.save(&path)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to save graph snapshot");
                false
            }
            Err(e) => {
                warn!(error = %e, "Snapshot task failed");
                false
            }
        };
        self.metrics.record_snapshot(saved);
    }
}

/// Run blocking graph or file work on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("background task failed: {e}")))?
}
