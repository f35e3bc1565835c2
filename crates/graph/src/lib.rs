pub mod attributes;
pub mod error;
pub mod export;
pub mod model;
pub mod names;
pub mod relation;
pub mod shared;
pub mod snapshot;
pub mod store;

pub use attributes::{AttributeConflict, AttributeValue, Attributes, ThreadStatus, TypedAttributes};
pub use error::{GraphError, Result};
pub use model::{
    Annotation, Direction, Entity, EntityFilter, EntityId, EntityType, EntityUpdate, NewEntity,
    NewRelationship, Relationship, RelationshipFilter, RelationshipId, RelationshipUpdate, SceneRef,
};
pub use names::normalize_name;
pub use relation::{RelationCategory, RelationType, TemporalOrder, content_key};
pub use shared::SharedGraph;
pub use snapshot::{GraphSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{ConnectionStats, EntityDetails, GraphMetadata, KnowledgeGraph};
