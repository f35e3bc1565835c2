//! Read-only views over the committed graph: health, statistics,
//! analytics, consistency, exports.

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use analytics::{
    CentralityScore, CommunityDetection, GraphPath, GraphStatistics, PageRankConfig, PathQuery,
};
use consistency::ConsistencyReport;
use extract::JobStats;
use graph::export::{NodeLinkGraph, to_graphml, to_node_link};
use graph::{Direction, EntityId, GraphMetadata, GraphSnapshot};

use super::{parse_id, parse_types};
use crate::error::ApiError;
use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    project: String,
    generation: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        project: state.graph.snapshot().project_id().to_string(),
        generation: state.graph.generation(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    metadata: GraphMetadata,
    graph: GraphStatistics,
    jobs: JobStats,
    metrics: MetricsSnapshot,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let graph = state.graph.snapshot();
    Json(StatsResponse {
        metadata: graph.metadata(),
        graph: analytics::statistics(&graph),
        jobs: state.jobs.stats(),
        metrics: state.metrics.snapshot(),
    })
}

#[derive(Deserialize)]
pub struct PathParams {
    from: String,
    to: String,
    types: Option<String>,
    #[serde(default)]
    direction: Direction,
}

#[derive(Serialize)]
pub struct PathResponse {
    found: bool,
    path: Option<GraphPath>,
}

pub async fn path(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<PathResponse>, ApiError> {
    let from: EntityId = parse_id(&params.from, "entity")?;
    let to: EntityId = parse_id(&params.to, "entity")?;
    let query = PathQuery {
        direction: params.direction,
        relation_types: parse_types(params.types.as_deref())?,
    };
    let path = analytics::shortest_path(&state.graph.snapshot(), from, to, &query);
    Ok(Json(PathResponse {
        found: path.is_some(),
        path,
    }))
}

#[derive(Deserialize)]
pub struct CentralityParams {
    top: Option<usize>,
}

pub async fn centrality(
    State(state): State<AppState>,
    Query(params): Query<CentralityParams>,
) -> Json<Vec<CentralityScore>> {
    let graph = state.graph.snapshot();
    Json(analytics::top_central(&graph, params.top.unwrap_or(10), &PageRankConfig::default()))
}

#[derive(Deserialize)]
pub struct CommunityParams {
    types: Option<String>,
}

pub async fn communities(
    State(state): State<AppState>,
    Query(params): Query<CommunityParams>,
) -> Result<Json<CommunityDetection>, ApiError> {
    let types = parse_types(params.types.as_deref())?;
    let graph = state.graph.snapshot();
    Ok(Json(analytics::detect_communities(&graph, types.as_deref())))
}

#[derive(Deserialize)]
pub struct ConsistencyParams {
    position: Option<u32>,
}

pub async fn consistency(
    State(state): State<AppState>,
    Query(params): Query<ConsistencyParams>,
) -> Json<ConsistencyReport> {
    let graph = state.graph.snapshot();
    Json(state.consistency.check(&graph, params.position))
}

pub async fn export_snapshot(State(state): State<AppState>) -> Json<GraphSnapshot> {
    Json(state.graph.snapshot().to_snapshot())
}

pub async fn export_node_link(State(state): State<AppState>) -> Json<NodeLinkGraph> {
    Json(to_node_link(&state.graph.snapshot()))
}

pub async fn export_graphml(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let body = to_graphml(&state.graph.snapshot())
        .map_err(|e| ApiError::Internal(format!("graphml export failed: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "application/graphml+xml")], body))
}
