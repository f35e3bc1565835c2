use thiserror::Error;

use crate::model::{EntityId, RelationshipId};

/// Errors raised by the graph store.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("concurrency error: {0}")]
    Concurrency(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_) | Self::RelationshipNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let id = EntityId(uuid::Uuid::nil());
        let err = GraphError::EntityNotFound(id);
        assert_eq!(err.to_string(), format!("entity not found: {}", uuid::Uuid::nil()));
        assert!(err.is_not_found());

        let err = GraphError::validation("bad relation type");
        assert_eq!(err.to_string(), "validation error: bad relation type");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: GraphError = json_err.into();
        assert!(matches!(err, GraphError::Serialization(_)));
    }
}
