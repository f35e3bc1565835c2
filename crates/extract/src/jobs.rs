//! Extraction job lifecycle: one job per scene request, merged into the
//! graph as a single batch once the extractor has answered.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as SceneLock, Semaphore, watch};
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use graph::{GraphError, SceneRef, SharedGraph};

use crate::error::{ExtractError, Result};
use crate::llm::Extractor;
use crate::resolver::{EntityResolver, MergeReport, Rejection};
use crate::schema::{SceneInput, UsageMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub entities_created: usize,
    pub entities_enriched: usize,
    pub relationships_created: usize,
    pub relationships_existing: usize,
    pub rejected: usize,
}

impl From<&MergeReport> for JobCounts {
    fn from(report: &MergeReport) -> Self {
        Self {
            entities_created: report.entities_created,
            entities_enriched: report.entities_enriched,
            relationships_created: report.relationships_created,
            relationships_existing: report.relationships_existing,
            rejected: report.rejected.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: JobId,
    pub scene: SceneRef,
    pub status: JobStatus,
    pub extractor_id: String,
    pub counts: JobCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
    pub usage: Option<UsageMetrics>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Completed over completed plus failed; 0 when nothing has finished.
    pub success_rate: f64,
    pub usage: UsageMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobManagerConfig {
    pub extraction_timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            extraction_timeout: Duration::from_secs(120),
            max_concurrent: 4,
        }
    }
}

struct JobState {
    job: ExtractionJob,
    merging: bool,
}

struct JobHandle {
    id: JobId,
    state: Mutex<JobState>,
    status: watch::Sender<JobStatus>,
}

impl JobHandle {
    fn snapshot(&self) -> ExtractionJob {
        self.state.lock().job.clone()
    }

    fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.job.status != JobStatus::Pending {
            return false;
        }
        state.job.status = JobStatus::Running;
        state.job.started_at = Some(Utc::now());
        drop(state);

        self.status.send_replace(JobStatus::Running);
        info!(job_id = %self.id, "Extraction job running");
        true
    }

    /// Past this point the job can no longer be cancelled.
    fn begin_merge(&self, usage: Option<UsageMetrics>) -> bool {
        let mut state = self.state.lock();
        if state.job.status != JobStatus::Running {
            return false;
        }
        state.merging = true;
        state.job.usage = usage;
        true
    }

    fn finish(&self, status: JobStatus, apply: impl FnOnce(&mut ExtractionJob)) {
        let mut state = self.state.lock();
        if state.job.status.is_terminal() {
            return;
        }
        state.job.status = status;
        state.job.finished_at = Some(Utc::now());
        apply(&mut state.job);
        drop(state);

        self.status.send_replace(status);
    }

    fn complete(&self, report: MergeReport) {
        info!(
            job_id = %self.id,
            entities_created = report.entities_created,
            entities_enriched = report.entities_enriched,
            relationships_created = report.relationships_created,
            rejected = report.rejected.len(),
            "Extraction job completed"
        );
        self.finish(JobStatus::Completed, |job| {
            job.counts = JobCounts::from(&report);
            job.rejections = report.rejected;
        });
    }

    fn fail(&self, message: String) {
        warn!(job_id = %self.id, error = %message, "Extraction job failed");
        self.finish(JobStatus::Failed, |job| job.error = Some(message));
    }

    fn cancel(&self) -> Result<ExtractionJob> {
        let mut state = self.state.lock();
        let status = state.job.status;
        if status.is_terminal() || state.merging {
            return Err(ExtractError::NotCancellable { id: self.id, status });
        }
        state.job.status = JobStatus::Cancelled;
        state.job.finished_at = Some(Utc::now());
        let job = state.job.clone();
        drop(state);

        self.status.send_replace(JobStatus::Cancelled);
        info!(job_id = %self.id, "Extraction job cancelled");
        Ok(job)
    }
}

/// Resolves once the job has been cancelled.
async fn cancelled(mut status: watch::Receiver<JobStatus>) {
    if status.wait_for(|s| *s == JobStatus::Cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs extraction jobs against an injected extractor and merges their
/// results into the shared graph.
#[derive(Clone)]
pub struct JobManager {
    graph: Arc<SharedGraph>,
    extractor: Arc<dyn Extractor>,
    resolver: Arc<EntityResolver>,
    config: JobManagerConfig,
    jobs: Arc<DashMap<JobId, Arc<JobHandle>>>,
    scene_locks: Arc<DashMap<String, Arc<SceneLock<()>>>>,
    permits: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(
        graph: Arc<SharedGraph>,
        extractor: Arc<dyn Extractor>,
        resolver: EntityResolver,
        config: JobManagerConfig,
    ) -> Self {
        Self {
            graph,
            extractor,
            resolver: Arc::new(resolver),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            jobs: Arc::new(DashMap::new()),
            scene_locks: Arc::new(DashMap::new()),
        }
    }

    fn register(&self, input: &SceneInput) -> Arc<JobHandle> {
        let job = ExtractionJob {
            id: JobId::new(),
            scene: input.scene.clone(),
            status: JobStatus::Pending,
            extractor_id: self.extractor.id().to_string(),
            counts: JobCounts::default(),
            rejections: Vec::new(),
            usage: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let (status, _) = watch::channel(JobStatus::Pending);
        let handle = Arc::new(JobHandle {
            id: job.id,
            state: Mutex::new(JobState { job, merging: false }),
            status,
        });
        self.jobs.insert(handle.id, handle.clone());
        info!(job_id = %handle.id, scene = %input.scene.id, "Extraction job submitted");
        handle
    }

    fn handle(&self, id: JobId) -> Result<Arc<JobHandle>> {
        self.jobs
            .get(&id)
            .map(|h| h.value().clone())
            .ok_or(ExtractError::JobNotFound(id))
    }

    /// Queue an extraction in the background and return its id.
    pub fn submit(&self, input: SceneInput) -> JobId {
        let handle = self.register(&input);
        let id = handle.id;
        let this = self.clone();
        tokio::spawn(async move { this.execute(handle, input).await });
        id
    }

    /// Run an extraction to its end and return the final job record.
    pub async fn process(&self, input: SceneInput) -> ExtractionJob {
        let handle = self.register(&input);
        self.execute(handle.clone(), input).await;
        handle.snapshot()
    }

    pub fn cancel(&self, id: JobId) -> Result<ExtractionJob> {
        self.handle(id)?.cancel()
    }

    pub fn job(&self, id: JobId) -> Result<ExtractionJob> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Jobs newest first, optionally for one scene.
    pub fn jobs(&self, scene_id: Option<&str>) -> Vec<ExtractionJob> {
        let mut jobs: Vec<ExtractionJob> = self
            .jobs
            .iter()
            .map(|h| h.value().snapshot())
            .filter(|j| scene_id.is_none_or(|s| j.scene.id == s))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, id: JobId) -> Result<ExtractionJob> {
        let handle = self.handle(id)?;
        let mut status = handle.status.subscribe();
        let _ = status.wait_for(JobStatus::is_terminal).await;
        Ok(handle.snapshot())
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for handle in self.jobs.iter() {
            let job = handle.value().snapshot();
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
            if let Some(usage) = job.usage {
                stats.usage = stats.usage + usage;
            }
        }
        let finished = stats.completed + stats.failed;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
        }
        stats
    }

    #[instrument(skip(self, handle, input), fields(job_id = %handle.id, scene = %input.scene.id))]
    async fn execute(&self, handle: Arc<JobHandle>, input: SceneInput) {
        let scene_lock = self
            .scene_locks
            .entry(input.scene.id.clone())
            .or_default()
            .clone();

        let _scene_guard = tokio::select! {
            guard = scene_lock.lock_owned() => guard,
            _ = cancelled(handle.status.subscribe()) => return,
        };
        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return handle.fail(format!("extraction capacity unavailable: {e}")),
            },
            _ = cancelled(handle.status.subscribe()) => return,
        };

        let epoch = self.graph.restore_epoch();
        if !handle.start() {
            return;
        }

        let limit = self.config.extraction_timeout;
        let extraction = tokio::select! {
            res = timeout(limit, self.extractor.extract(&input)) => {
                res.unwrap_or_else(|_| Err(ExtractError::Timeout(limit)))
            }
            _ = cancelled(handle.status.subscribe()) => return,
        };
        let output = match extraction {
            Ok(output) => output,
            Err(e) => return handle.fail(e.to_string()),
        };

        if !handle.begin_merge(output.usage) {
            return;
        }

        let graph = self.graph.clone();
        let resolver = self.resolver.clone();
        let scene = input.scene.clone();
        let merged = tokio::task::spawn_blocking(move || {
            graph.mutate_at_epoch(epoch, |g| resolver.merge(g, &scene, &output))
        })
        .await;

        match merged {
            Ok(Ok(report)) => handle.complete(report),
            Ok(Err(GraphError::Concurrency(msg))) => handle.fail(format!("merge refused: {msg}")),
            Ok(Err(e)) => handle.fail(format!("merge failed: {e}")),
            Err(e) => handle.fail(format!("merge task aborted: {e}")),
        }
    }
}
