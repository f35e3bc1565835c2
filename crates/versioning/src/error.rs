use thiserror::Error;

use graph::GraphError;

use crate::checkpoint::CheckpointId;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VersionError>;
