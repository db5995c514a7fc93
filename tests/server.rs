//! HTTP API tests driven through the router with `oneshot`.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{chat_export, fact_count, pipeline, ScriptedEnricher};
use serde_json::Value;
use session_warehouse::server::build_router;
use std::sync::Arc;
use tower::util::ServiceExt;

const BOUNDARY: &str = "swh-test-boundary";

fn multipart(field: &str, file_name: &str, payload: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/json\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/process")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_tmp, pipeline) = pipeline(ScriptedEnricher::new(0)).await;
    let app = build_router(Arc::new(pipeline));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_process_returns_report_and_sessions() {
    let (_tmp, pipeline) = pipeline(ScriptedEnricher::new(5)).await;
    let pipeline = Arc::new(pipeline);
    let app = build_router(pipeline.clone());

    let (status, body) = send(&app, multipart("file", "chat.json", &chat_export(3))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["report"]["sessions"], 3);
    assert_eq!(body["data"]["report"]["file_name"], "chat.json");

    let sessions = body["data"]["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 3);
    assert!(sessions[2]["session_id"].as_str().unwrap().ends_with("_3"));
    assert_eq!(sessions[0]["meta"]["msg_count"], 2);
    assert_eq!(fact_count(&pipeline).await, 3);

    let (status, dash) = send(&app, get("/api/dashboard")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dash["data"]["total_sessions"], 3);
    assert_eq!(dash["data"]["sessions_by_outcome"]["won"], 3);
}

#[tokio::test]
async fn test_duplicate_upload_conflicts() {
    let (_tmp, pipeline) = pipeline(ScriptedEnricher::new(0)).await;
    let app = build_router(Arc::new(pipeline));
    let payload = chat_export(1);

    let (status, first) = send(&app, multipart("file", "chat.json", &payload)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, multipart("file", "again.json", &payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "duplicate");
    assert_eq!(body["data"]["hash"], first["data"]["report"]["fingerprint"]);
}

#[tokio::test]
async fn test_invalid_upload_is_bad_request() {
    let (_tmp, pipeline) = pipeline(ScriptedEnricher::new(0)).await;
    let app = build_router(Arc::new(pipeline));

    let (status, body) = send(&app, multipart("file", "x.json", br#"{"rows": []}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_format");
}

#[tokio::test]
async fn test_missing_file_field_is_bad_request() {
    let (_tmp, pipeline) = pipeline(ScriptedEnricher::new(0)).await;
    let app = build_router(Arc::new(pipeline));

    let (status, body) = send(&app, multipart("attachment", "chat.json", &chat_export(1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_enrichment_failure_is_bad_gateway() {
    let enricher = ScriptedEnricher::new(0);
    enricher.set_failing(true);
    let (_tmp, pipeline) = pipeline(enricher).await;
    let pipeline = Arc::new(pipeline);
    let app = build_router(pipeline.clone());

    let (status, body) = send(&app, multipart("file", "chat.json", &chat_export(2))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "enrichment_failed");
    assert_eq!(fact_count(&pipeline).await, 0);
}
