//! Entity and relationship endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use analytics::Neighborhood;
use graph::{
    Entity, EntityDetails, EntityFilter, EntityId, EntityUpdate, NewEntity, NewRelationship,
    Relationship, RelationshipFilter, RelationshipId, RelationshipUpdate,
};

use super::{parse_id, parse_types};
use crate::error::ApiError;
use crate::state::AppState;

const MAX_HOPS: usize = 6;

pub async fn list_entities(
    State(state): State<AppState>,
    Query(filter): Query<EntityFilter>,
) -> Json<Vec<Entity>> {
    let graph = state.graph.snapshot();
    Json(graph.list_entities(&filter).into_iter().cloned().collect())
}

pub async fn create_entity(
    State(state): State<AppState>,
    Json(new): Json<NewEntity>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    let entity = state
        .mutate(move |g| {
            let id = g.add_entity(new)?;
            g.get_entity(id).cloned()
        })
        .await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EntityDetails>, ApiError> {
    let id: EntityId = parse_id(&id, "entity")?;
    Ok(Json(state.graph.snapshot().entity_details(id)?))
}

pub async fn update_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<EntityUpdate>,
) -> Result<Json<Entity>, ApiError> {
    let id: EntityId = parse_id(&id, "entity")?;
    let entity = state.mutate(move |g| g.update_entity(id, update).cloned()).await?;
    Ok(Json(entity))
}

#[derive(Serialize)]
pub struct EntityDeleted {
    pub deleted: EntityId,
    pub relationships_removed: Vec<RelationshipId>,
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EntityDeleted>, ApiError> {
    let id: EntityId = parse_id(&id, "entity")?;
    let relationships_removed = state.mutate(move |g| g.delete_entity(id)).await?;
    Ok(Json(EntityDeleted {
        deleted: id,
        relationships_removed,
    }))
}

#[derive(Deserialize)]
pub struct NeighborhoodParams {
    hops: Option<usize>,
    types: Option<String>,
}

pub async fn neighborhood(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<NeighborhoodParams>,
) -> Result<Json<Neighborhood>, ApiError> {
    let id: EntityId = parse_id(&id, "entity")?;
    let hops = params.hops.unwrap_or(1);
    if hops > MAX_HOPS {
        return Err(ApiError::Validation(format!("hops must be at most {MAX_HOPS}")));
    }
    let types = parse_types(params.types.as_deref())?;
    let graph = state.graph.snapshot();
    Ok(Json(analytics::neighborhood(&graph, id, hops, types.as_deref())?))
}

pub async fn list_relationships(
    State(state): State<AppState>,
    Query(filter): Query<RelationshipFilter>,
) -> Json<Vec<Relationship>> {
    let graph = state.graph.snapshot();
    Json(graph.list_relationships(&filter).into_iter().cloned().collect())
}

pub async fn create_relationship(
    State(state): State<AppState>,
    Json(new): Json<NewRelationship>,
) -> Result<(StatusCode, Json<Relationship>), ApiError> {
    let relationship = state
        .mutate(move |g| {
            let id = g.add_relationship(new)?;
            g.get_relationship(id).cloned()
        })
        .await?;
    Ok((StatusCode::CREATED, Json(relationship)))
}

pub async fn get_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Relationship>, ApiError> {
    let id: RelationshipId = parse_id(&id, "relationship")?;
    Ok(Json(state.graph.snapshot().get_relationship(id)?.clone()))
}

pub async fn update_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<RelationshipUpdate>,
) -> Result<Json<Relationship>, ApiError> {
    let id: RelationshipId = parse_id(&id, "relationship")?;
    let relationship = state.mutate(move |g| g.update_relationship(id, update).cloned()).await?;
    Ok(Json(relationship))
}

pub async fn delete_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Relationship>, ApiError> {
    let id: RelationshipId = parse_id(&id, "relationship")?;
    Ok(Json(state.mutate(move |g| g.delete_relationship(id)).await?))
}
