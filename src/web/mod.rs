//! Payment HTTP API.
//!
//! Runs alongside the bot on PORT and exposes payment creation, the Payme
//! webhook, a test webhook, and status/history queries.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::net::TcpListener;

use crate::core::config;
use crate::payme;
use crate::storage::db::DbPool;
use crate::storage::get_connection;
use crate::storage::payments::{self, PaymentStatus};
use crate::storage::users;

/// Shared state for the payment API.
#[derive(Clone)]
struct WebState {
    db: Arc<DbPool>,
    bot: Bot,
}

/// Build the payment API router.
pub fn router(db: Arc<DbPool>, bot: Bot) -> Router {
    let state = WebState { db, bot };
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/payment/create", post(create_payment_handler))
        .route("/payment/webhook/payme", post(payme_webhook_handler))
        .route("/payment/webhook/test", post(test_webhook_handler))
        .route("/payment/status/{id}", get(payment_status_handler))
        .route("/payment/premium-status/{id}", get(premium_status_handler))
        .route("/payment/history/{id}", get(payment_history_handler))
        .with_state(state)
}

/// Start the payment API server.
pub async fn start_web_server(port: u16, db: Arc<DbPool>, bot: Bot) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(db, bot);

    log::info!("Starting payment API on http://{}", addr);
    log::info!("  POST /payment/create            - Create a Payme payment");
    log::info!("  POST /payment/webhook/payme     - Payme JSON-RPC webhook");
    log::info!("  POST /payment/webhook/test      - Manual test webhook");
    log::info!("  GET  /payment/status/:id        - Payment status");
    log::info!("  GET  /payment/premium-status/:id - Premium status by telegram id");
    log::info!("  GET  /payment/history/:id       - Payment history by telegram id");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET / — service banner.
async fn root_handler() -> impl IntoResponse {
    Json(json!({ "service": "kinoteka", "status": "running" }))
}

/// GET /health — simple health check.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody {
    user_id: i64,
    amount: i64,
    duration_days: i64,
}

/// POST /payment/create — create a pending payme payment and return the link.
async fn create_payment_handler(State(state): State<WebState>, Json(body): Json<CreatePaymentBody>) -> Response {
    if body.amount <= 0 || body.duration_days <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "amount and durationDays must be positive" })),
        )
            .into_response();
    }

    let conn = match get_connection(&state.db) {
        Ok(conn) => conn,
        Err(e) => return db_error(e),
    };

    match payments::create_payment(&conn, body.user_id, body.amount, body.duration_days, "payme", None) {
        Ok(payment_id) => {
            let link = payme::checkout_link(
                &config::payme::ENDPOINT,
                &config::payme::MERCHANT_ID,
                payment_id,
                body.amount,
            );
            Json(json!({ "success": true, "paymentId": payment_id, "paymentLink": link })).into_response()
        }
        Err(e) => {
            log::error!("Failed to create payment: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Failed to create payment" })),
            )
                .into_response()
        }
    }
}

/// POST /payment/webhook/payme — Payme JSON-RPC endpoint.
async fn payme_webhook_handler(State(state): State<WebState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
    if !payme::verify_auth(authorization, &config::payme::MERCHANT_KEY) {
        log::warn!("Payme webhook called with invalid authorization");
        return Json(payme::auth_error(&body)).into_response();
    }

    let conn = match get_connection(&state.db) {
        Ok(conn) => conn,
        Err(e) => return db_error(e),
    };

    let method = body.get("method").and_then(Value::as_str).unwrap_or("").to_string();
    let response = payme::process_request(&conn, &body);

    // On a successful PerformTransaction, tell the payer in Telegram.
    if method == "PerformTransaction" && response.get("result").is_some() {
        if let Some(tx) = body
            .get("params")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
        {
            if let Ok(Some(payment)) = payments::find_payment_by_payme_transaction(&conn, tx) {
                notify_premium_granted(&state.bot, payment.user_id, payment.duration_days).await;
            }
        }
    }

    Json(response).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestWebhookBody {
    payment_id: i64,
}

/// POST /payment/webhook/test — mark a payment paid without the gateway.
async fn test_webhook_handler(State(state): State<WebState>, Json(body): Json<TestWebhookBody>) -> Response {
    let conn = match get_connection(&state.db) {
        Ok(conn) => conn,
        Err(e) => return db_error(e),
    };

    let payment = match payments::find_payment_by_id(&conn, body.payment_id) {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "error": "Payment not found" })),
            )
                .into_response()
        }
        Err(e) => return db_error_rusqlite(e),
    };

    if payment.status != PaymentStatus::Pending {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Payment is not pending" })),
        )
            .into_response();
    }

    let grant = payments::set_payment_status(&conn, payment.id, PaymentStatus::Paid)
        .and_then(|_| users::grant_premium(&conn, payment.user_id, payment.duration_days));
    match grant {
        Ok(expires_at) => {
            log::info!(
                "Test webhook marked payment {} paid, premium until {}",
                payment.id,
                expires_at
            );
            notify_premium_granted(&state.bot, payment.user_id, payment.duration_days).await;
            Json(json!({ "success": true, "paymentId": payment.id, "premiumExpiresAt": expires_at })).into_response()
        }
        Err(e) => db_error_rusqlite(e),
    }
}

/// GET /payment/status/:id — payment row status.
async fn payment_status_handler(Path(id): Path<i64>, State(state): State<WebState>) -> Response {
    let conn = match get_connection(&state.db) {
        Ok(conn) => conn,
        Err(e) => return db_error(e),
    };

    match payments::find_payment_by_id(&conn, id) {
        Ok(Some(payment)) => Json(json!({
            "success": true,
            "paymentId": payment.id,
            "status": payment.status.as_str(),
            "amount": payment.amount,
            "durationDays": payment.duration_days,
            "provider": payment.provider,
            "createdAt": payment.created_at,
            "processedAt": payment.processed_at,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Payment not found" })),
        )
            .into_response(),
        Err(e) => db_error_rusqlite(e),
    }
}

/// GET /payment/premium-status/:id — premium flag and expiry by telegram id.
async fn premium_status_handler(Path(telegram_id): Path<i64>, State(state): State<WebState>) -> Response {
    let conn = match get_connection(&state.db) {
        Ok(conn) => conn,
        Err(e) => return db_error(e),
    };

    let active = users::is_premium_active(&conn, telegram_id).unwrap_or(false);
    match users::find_by_telegram_id(&conn, telegram_id) {
        Ok(Some(user)) => Json(json!({
            "success": true,
            "userId": user.telegram_id,
            "isPremium": active,
            "premiumExpiresAt": user.premium_expires_at,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "User not found" })),
        )
            .into_response(),
        Err(e) => db_error_rusqlite(e),
    }
}

/// GET /payment/history/:id — payment list for a telegram id.
async fn payment_history_handler(Path(telegram_id): Path<i64>, State(state): State<WebState>) -> Response {
    let conn = match get_connection(&state.db) {
        Ok(conn) => conn,
        Err(e) => return db_error(e),
    };

    match payments::find_payments_by_user(&conn, telegram_id) {
        Ok(list) => {
            let items: Vec<Value> = list
                .iter()
                .map(|p| {
                    json!({
                        "paymentId": p.id,
                        "amount": p.amount,
                        "durationDays": p.duration_days,
                        "provider": p.provider,
                        "status": p.status.as_str(),
                        "createdAt": p.created_at,
                        "processedAt": p.processed_at,
                    })
                })
                .collect();
            Json(json!({ "success": true, "userId": telegram_id, "payments": items })).into_response()
        }
        Err(e) => db_error_rusqlite(e),
    }
}

async fn notify_premium_granted(bot: &Bot, telegram_id: i64, duration_days: i64) {
    let text = format!(
        "✅ To'lov qabul qilindi!\n\nPremium obuna {} kunga faollashtirildi. Yoqimli tomosha!",
        duration_days
    );
    if let Err(e) = bot.send_message(ChatId(telegram_id), text).await {
        log::warn!("Failed to notify user {} about premium: {}", telegram_id, e);
    }
}

fn db_error(e: r2d2::Error) -> Response {
    log::error!("Failed to get DB connection for payment API: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "Database unavailable" })),
    )
        .into_response()
}

fn db_error_rusqlite(e: rusqlite::Error) -> Response {
    log::error!("Payment API database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "Database error" })),
    )
        .into_response()
}
