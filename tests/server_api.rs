//! HTTP API: error contract, request validation and session lifecycle.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{setup_config, ScriptedModel, TableEmbedder};
use etf_assistant::app::Services;
use etf_assistant::chains::prompts::ANSWER_DIRECTLY_TOOL;
use etf_assistant::llm::ChatResponse;
use etf_assistant::server::router;

async fn app(tmp: &TempDir, model: ScriptedModel) -> Router {
    let config = setup_config(tmp).await;
    let services = Services::with_providers(
        &config,
        Arc::new(model),
        Arc::new(TableEmbedder::new(&[])),
    )
    .await
    .unwrap();
    services.sync_catalog().await.unwrap();
    router(Arc::new(services))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, ScriptedModel::new(Vec::new())).await;

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(&app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_over_unknown_document_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, ScriptedModel::new(Vec::new())).await;

    let (status, json) = send(&app, post_json("/docs/42/chat", json!({ "question": "Fees?" }))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        json,
        json!({ "error": { "code": "not_found", "message": "Document 42 not found" } })
    );
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let model = ScriptedModel::new(Vec::new());
    let app = app(&tmp, model).await;

    let (status, json) = send(&app, post_json("/search/chat", json!({ "question": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
    assert_eq!(json["error"]["message"], "question must not be empty");
}

#[tokio::test]
async fn search_session_can_be_closed() {
    let tmp = TempDir::new().unwrap();
    let app = app(
        &tmp,
        ScriptedModel::new(vec![ChatResponse::tool_call(
            ANSWER_DIRECTLY_TOOL,
            json!({ "answer": "An ETF is an exchange-traded fund." }).to_string(),
        )]),
    )
    .await;

    let (status, json) = send(
        &app,
        post_json("/search/chat", json!({ "session_id": "s1", "question": "What is an ETF?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session_id"], "s1");
    assert_eq!(json["answer"], "An ETF is an exchange-traded fund.");
    assert_eq!(json["query"], Value::Null);

    let (status, _) = send(&app, delete("/sessions/s1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, json) = send(&app, delete("/sessions/s1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["message"], "Session s1 not found");
}
