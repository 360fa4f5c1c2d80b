//! Payment API tests: drive the axum router in-process and check the JSON
//! bodies the endpoints promise.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use teloxide::Bot;
use tower::ServiceExt;

use kinoteka::storage::create_pool;
use kinoteka::storage::db::DbPool;
use kinoteka::web;

fn test_pool(dir: &tempfile::TempDir) -> Arc<DbPool> {
    let path = dir.path().join("test.db");
    Arc::new(create_pool(path.to_str().unwrap()).unwrap())
}

fn test_router(db: Arc<DbPool>) -> axum::Router {
    // The endpoints under test never talk to Telegram.
    web::router(db, Bot::new("123456:TEST"))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(test_pool(&dir));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_payment_returns_id_and_checkout_link() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(test_pool(&dir));

    let response = app
        .oneshot(post_json(
            "/payment/create",
            json!({ "userId": 42, "amount": 15_000, "durationDays": 30 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert!(body["paymentId"].as_i64().unwrap() > 0);
    let link = body["paymentLink"].as_str().unwrap();
    assert!(link.starts_with("https://checkout.paycom.uz/"), "link: {}", link);
}

#[tokio::test]
async fn create_payment_rejects_non_positive_amount() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(test_pool(&dir));

    let response = app
        .oneshot(post_json(
            "/payment/create",
            json!({ "userId": 42, "amount": 0, "durationDays": 30 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn payment_status_reflects_the_created_payment() {
    let dir = tempfile::tempdir().unwrap();
    let pool = test_pool(&dir);

    let created = test_router(pool.clone())
        .oneshot(post_json(
            "/payment/create",
            json!({ "userId": 42, "amount": 15_000, "durationDays": 30 }),
        ))
        .await
        .unwrap();
    let payment_id = json_body(created).await["paymentId"].as_i64().unwrap();

    let response = test_router(pool)
        .oneshot(
            Request::builder()
                .uri(format!("/payment/status/{}", payment_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["paymentId"], payment_id);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], 15_000);
    assert_eq!(body["durationDays"], 30);
}

#[tokio::test]
async fn payment_status_for_unknown_id_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(test_pool(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/payment/status/9999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn payme_webhook_without_auth_gets_the_rpc_auth_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(test_pool(&dir));

    let response = app
        .oneshot(post_json(
            "/payment/webhook/payme",
            json!({ "id": 7, "method": "CheckPerformTransaction", "params": {} }),
        ))
        .await
        .unwrap();

    // Payme expects JSON-RPC errors over HTTP 200.
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32504);
    assert_eq!(body["id"], 7);
}
