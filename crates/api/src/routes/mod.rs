mod analysis;
mod checkpoints;
mod graph;
mod jobs;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::str::FromStr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use ::graph::RelationType;

use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();

    Router::new()
        .route("/health", get(analysis::health))
        .route("/stats", get(analysis::stats))
        .route("/entities", get(graph::list_entities).post(graph::create_entity))
        .route(
            "/entities/:id",
            get(graph::get_entity).patch(graph::update_entity).delete(graph::delete_entity),
        )
        .route("/entities/:id/neighborhood", get(graph::neighborhood))
        .route("/relationships", get(graph::list_relationships).post(graph::create_relationship))
        .route(
            "/relationships/:id",
            get(graph::get_relationship)
                .patch(graph::update_relationship)
                .delete(graph::delete_relationship),
        )
        .route("/paths", get(analysis::path))
        .route("/analytics/centrality", get(analysis::centrality))
        .route("/analytics/communities", get(analysis::communities))
        .route("/scenes/:scene_id/extract", post(jobs::submit_extraction))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/checkpoints", get(checkpoints::list).post(checkpoints::create))
        .route("/checkpoints/:id", get(checkpoints::get).delete(checkpoints::delete))
        .route("/checkpoints/:id/diff", get(checkpoints::diff_live))
        .route("/checkpoints/:id/diff/:other", get(checkpoints::diff))
        .route("/checkpoints/:id/restore", post(checkpoints::restore))
        .route("/consistency", get(analysis::consistency))
        .route("/export/snapshot", get(analysis::export_snapshot))
        .route("/export/graphml", get(analysis::export_graphml))
        .route("/export/node-link", get(analysis::export_node_link))
        .layer(middleware::from_fn_with_state(metrics, metrics::track))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::Validation(format!("invalid {what} id: {raw:?}")))
}

/// Comma-separated relation types; empty means no restriction.
fn parse_types(raw: Option<&str>) -> Result<Option<Vec<RelationType>>, ApiError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let types = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RelationType::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!types.is_empty()).then_some(types))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StorageConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use extract::{
        CandidateEntity, CandidateRelationship, ExtractionOutput, Extractor, JobId, SceneInput,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct StaticExtractor;

    #[async_trait]
    impl Extractor for StaticExtractor {
        fn id(&self) -> &str {
            "static"
        }

        async fn extract(&self, _input: &SceneInput) -> extract::Result<ExtractionOutput> {
            Ok(ExtractionOutput {
                entities: vec![
                    CandidateEntity::new("Mickey Bardot", "character"),
                    CandidateEntity::new("Noni", "character"),
                ],
                relationships: vec![CandidateRelationship::new("Mickey Bardot", "Noni", "knows")],
                usage: None,
            })
        }
    }

    fn memory_config() -> AppConfig {
        AppConfig {
            storage: StorageConfig {
                persist: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn setup() -> (AppState, Router) {
        let state = AppState::new(memory_config(), Arc::new(StaticExtractor)).unwrap();
        (state.clone(), router(state))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn create_entity(app: &Router, name: &str, entity_type: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/entities",
            Some(json!({"name": name, "type": entity_type})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_entity_crud() {
        let (_state, app) = setup();
        let id = create_entity(&app, "Mickey Bardot", "character").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/entities",
            Some(json!({"name": "mickey  bardot", "type": "character"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("already exists"));

        let (status, body) = call(&app, Method::GET, &format!("/entities/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entity"]["name"], "Mickey Bardot");

        let (_, body) = call(&app, Method::GET, "/entities?type=character", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (_, body) = call(&app, Method::GET, "/entities?type=location", None).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, body) = call(
            &app,
            Method::PATCH,
            &format!("/entities/{id}"),
            Some(json!({"verified": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);

        let (status, _) = call(&app, Method::GET, "/entities/not-an-id", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let missing = ::graph::EntityId::new();
        let (status, body) = call(&app, Method::GET, &format!("/entities/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, Method::DELETE, &format!("/entities/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &format!("/entities/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_relationships_paths_and_cascade() {
        let (_state, app) = setup();
        let a = create_entity(&app, "A", "character").await;
        let b = create_entity(&app, "B", "character").await;
        let c = create_entity(&app, "C", "character").await;
        let d = create_entity(&app, "D", "character").await;

        for (source, target, relation) in [(&a, &b, "knows"), (&b, &c, "friend_of")] {
            let (status, body) = call(
                &app,
                Method::POST,
                "/relationships",
                Some(json!({"source": source, "target": target, "relation_type": relation})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/paths?from={a}&to={c}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["found"], true);
        assert_eq!(body["path"]["length"], 2);
        assert_eq!(body["path"]["entities"], json!([a, b, c]));

        let (_, body) = call(&app, Method::GET, &format!("/paths?from={a}&to={d}"), None).await;
        assert_eq!(body["found"], false);
        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/paths?from={a}&to={c}&types=knows"),
            None,
        )
        .await;
        assert_eq!(body["found"], false);
        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/paths?from={a}&to={c}&types=bogus"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/entities/{a}/neighborhood?hops=2"),
            None,
        )
        .await;
        assert_eq!(body["entities"].as_array().unwrap().len(), 2);

        let (_, body) = call(&app, Method::GET, &format!("/relationships?entity={b}"), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = call(&app, Method::DELETE, &format!("/entities/{b}"), None).await;
        assert_eq!(body["relationships_removed"].as_array().unwrap().len(), 2);
        let (_, body) = call(&app, Method::GET, "/relationships", None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_job_lifecycle() {
        let (state, app) = setup();

        let (status, body) = call(
            &app,
            Method::POST,
            "/scenes/s1/extract",
            Some(json!({"sequence": 1, "text": "Mickey met Noni."})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id: JobId = body["job_id"].as_str().unwrap().parse().unwrap();

        let job = state.jobs.wait(job_id).await.unwrap();
        assert_eq!(job.counts.entities_created, 2);

        let (_, body) = call(&app, Method::GET, &format!("/jobs/{job_id}"), None).await;
        assert_eq!(body["status"], "completed");
        let (_, body) = call(&app, Method::GET, "/jobs?scene=s1", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (_, body) = call(&app, Method::GET, "/entities", None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = call(&app, Method::POST, &format!("/jobs/{job_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/scenes/s2/extract",
            Some(json!({"sequence": 2, "text": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = call(&app, Method::GET, &format!("/jobs/{}", JobId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_extraction_disabled() {
        let mut config = memory_config();
        config.extractor.enabled = false;
        let app = router(AppState::new(config, Arc::new(StaticExtractor)).unwrap());
        let (status, _) = call(
            &app,
            Method::POST,
            "/scenes/s1/extract",
            Some(json!({"sequence": 1, "text": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_checkpoint_diff_and_restore() {
        let (_state, app) = setup();
        create_entity(&app, "A", "character").await;

        let (status, first) = call(
            &app,
            Method::POST,
            "/checkpoints",
            Some(json!({"label": "draft"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let first = first["id"].as_str().unwrap().to_string();

        create_entity(&app, "B", "location").await;
        let (_, diff) = call(&app, Method::GET, &format!("/checkpoints/{first}/diff"), None).await;
        assert_eq!(diff["entities_added"].as_array().unwrap().len(), 1);

        let (_, second) = call(
            &app,
            Method::POST,
            "/checkpoints",
            Some(json!({"label": "more"})),
        )
        .await;
        let second = second["id"].as_str().unwrap().to_string();
        let (_, diff) = call(
            &app,
            Method::GET,
            &format!("/checkpoints/{first}/diff/{second}"),
            None,
        )
        .await;
        assert_eq!(diff["entities_added"][0]["name"], "B");

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/checkpoints/{first}/restore"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, Method::GET, "/entities", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, list) = call(&app, Method::GET, "/checkpoints", None).await;
        assert_eq!(list.as_array().unwrap().len(), 2);

        let (status, _) = call(&app, Method::DELETE, &format!("/checkpoints/{second}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/checkpoints/{second}/restore"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(
            &app,
            Method::POST,
            "/checkpoints",
            Some(json!({"label": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_read_views() {
        let (_state, app) = setup();
        let a = create_entity(&app, "A", "character").await;
        let bar = create_entity(&app, "Bar", "location").await;
        call(
            &app,
            Method::POST,
            "/relationships",
            Some(json!({"source": a, "target": bar, "relation_type": "located_in"})),
        )
        .await;

        let (_, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(body["status"], "ok");

        let (_, body) = call(&app, Method::GET, "/analytics/centrality?top=1", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (_, body) = call(&app, Method::GET, "/analytics/communities", None).await;
        assert_eq!(body["communities"].as_array().unwrap().len(), 1);

        let (_, body) = call(&app, Method::GET, "/consistency?position=5", None).await;
        assert_eq!(body["position"], 5);

        let (_, body) = call(&app, Method::GET, "/export/snapshot", None).await;
        assert_eq!(body["entities"].as_array().unwrap().len(), 2);
        let (_, body) = call(&app, Method::GET, "/export/node-link", None).await;
        assert_eq!(body["links"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/export/graphml").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/graphml+xml");

        let (_, body) = call(&app, Method::GET, "/stats", None).await;
        assert_eq!(body["graph"]["entity_count"], 2);
        assert!(body["metrics"]["total_requests"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_graph_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            storage: StorageConfig {
                data_dir: dir.path().to_path_buf(),
                project_id: "noir".to_string(),
                persist: true,
            },
            ..Default::default()
        };

        let app = router(AppState::new(config.clone(), Arc::new(StaticExtractor)).unwrap());
        create_entity(&app, "Mickey Bardot", "character").await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/checkpoints",
            Some(json!({"label": "saved"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(config.snapshot_path().exists());

        let reopened = AppState::new(config, Arc::new(StaticExtractor)).unwrap();
        assert_eq!(reopened.graph.snapshot().entity_count(), 1);
        assert_eq!(reopened.versions.list().len(), 1);
    }
}
