//! REST API integration tests against a real router with a temp database
//! and the mock gateway.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use taskflow_infra::settings::Settings;
use taskflow_types::run::RunStatus;

use taskflow_api::http;
use taskflow_api::state::AppState;

async fn test_state() -> AppState {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    // Leak tempdir so it lives for the test
    std::mem::forget(dir);

    let settings = Settings {
        database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
        bind_addr: "127.0.0.1:0".to_string(),
        provider: "mock".to_string(),
        engine: Default::default(),
    };
    AppState::init(&settings).await.unwrap()
}

async fn test_router() -> (Router, AppState) {
    let state = test_state().await;
    (http::router::build_router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (router, _state) = test_router().await;

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_run_completes_via_mock_gateway() {
    let (router, state) = test_router().await;

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/runs",
            serde_json::json!({ "task": "summarize the quarterly report" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let run_id: Uuid = json["data"]["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(json["data"]["task"], "summarize the quarterly report");
    assert!(json["_links"]["self"].as_str().unwrap().contains(&run_id.to_string()));

    state.supervisor.wait_for(run_id).await;

    let response = router
        .oneshot(get(&format!("/api/v1/runs/{run_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let status: RunStatus =
        serde_json::from_value(json["data"]["run"]["status"].clone()).unwrap();
    assert_eq!(status, RunStatus::Completed);
    assert!(json["data"]["run"]["totals"]["total_tokens"].as_u64().unwrap() > 0);
    assert!(json["data"]["diagnostics"].is_array());
}

#[tokio::test]
async fn missing_run_is_404() {
    let (router, _state) = test_router().await;

    let response = router
        .oneshot(get(&format!("/api/v1/runs/{}", Uuid::now_v7())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["errors"][0]["code"], "RUN_NOT_FOUND");
}

#[tokio::test]
async fn malformed_run_id_is_422() {
    let (router, _state) = test_router().await;

    let response = router.oneshot(get("/api/v1/runs/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = body_json(response).await;
    assert_eq!(json["errors"][0]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn empty_task_is_rejected() {
    let (router, _state) = test_router().await;

    let response = router
        .oneshot(post_json("/api/v1/runs", serde_json::json!({ "task": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn default_template_is_seeded_and_listed() {
    let (router, _state) = test_router().await;

    let response = router.clone().oneshot(get("/api/v1/templates")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let templates = json["data"].as_array().unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0]["id"], "template.default.v1");

    let response = router
        .oneshot(get("/api/v1/templates/template.default.v1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_template_graph_is_422() {
    let (router, _state) = test_router().await;

    // a -> b -> a cycle
    let template = serde_json::json!({
        "id": "template.cyclic.v1",
        "name": "Cyclic",
        "version": 1,
        "graph": {
            "nodes": [
                { "id": "a", "name": "A", "depends_on": ["b"] },
                { "id": "b", "name": "B", "depends_on": ["a"] }
            ],
            "edges": [
                { "source": "b", "target": "a" },
                { "source": "a", "target": "b" }
            ]
        },
        "contracts": { "a": {}, "b": {} }
    });

    let request = Request::builder()
        .method("PUT")
        .uri("/api/v1/templates/template.cyclic.v1")
        .header("content-type", "application/json")
        .body(Body::from(template.to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Nothing was stored
    let response = router
        .oneshot(get("/api/v1/templates/template.cyclic.v1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_of_completed_run_is_conflict() {
    let (router, state) = test_router().await;

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/runs",
            serde_json::json!({ "task": "a task that will succeed" }),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    let run_id: Uuid = json["data"]["id"].as_str().unwrap().parse().unwrap();

    state.supervisor.wait_for(run_id).await;

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/runs/{run_id}/retry"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["errors"][0]["code"], "CONFLICT");
}

#[tokio::test]
async fn request_id_header_is_honored() {
    let (router, _state) = test_router().await;

    let request = Request::builder()
        .uri("/api/v1/runs")
        .header("x-request-id", "req-from-client")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-from-client"
    );

    let json = body_json(response).await;
    assert_eq!(json["meta"]["request_id"], "req-from-client");
}
