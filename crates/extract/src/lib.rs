pub mod error;
pub mod jobs;
pub mod llm;
pub mod prompt;
pub mod resolver;
pub mod retry;
pub mod schema;

pub use error::{ExtractError, Result};
pub use jobs::{ExtractionJob, JobCounts, JobId, JobManager, JobManagerConfig, JobStats, JobStatus};
pub use llm::{Extractor, OllamaExtractor};
pub use resolver::{EntityResolver, MergeReport, Rejection, ResolverConfig};
pub use retry::RetryPolicy;
pub use schema::{
    CandidateEntity, CandidateRelationship, ExtractionOutput, SceneInput, UsageMetrics,
};
