//! Payme merchant integration: checkout links and the JSON-RPC 2.0 webhook.
//!
//! Payme calls `POST /payment/webhook/payme` with Basic auth (`Paycom:<key>`)
//! and a JSON-RPC body. Amounts on the wire are in tiyin (UZS * 100).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use crate::storage::db::DbConnection;
use crate::storage::payments::{self, PaymentStatus};
use crate::storage::users;

/// Payme error codes used by this merchant endpoint.
mod codes {
    pub const INVALID_AUTH: i64 = -32504;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const WRONG_AMOUNT: i64 = -31001;
    pub const TRANSACTION_NOT_FOUND: i64 = -31003;
    pub const CANNOT_PERFORM: i64 = -31008;
    pub const PAYMENT_NOT_FOUND: i64 = -31050;
}

/// Build the checkout URL for a pending payment.
///
/// The link carries `m=<merchant>;ac.payment_id=<id>;a=<tiyin>` base64-encoded
/// as the path segment.
pub fn checkout_link(endpoint: &str, merchant_id: &str, payment_id: i64, amount_uzs: i64) -> String {
    let params = format!("m={};ac.payment_id={};a={}", merchant_id, payment_id, amount_uzs * 100);
    format!("{}/{}", endpoint.trim_end_matches('/'), BASE64.encode(params))
}

/// Verify the webhook's Basic auth header against the merchant key.
pub fn verify_auth(authorization: Option<&str>, merchant_key: &str) -> bool {
    if merchant_key.is_empty() {
        return false;
    }
    let Some(raw) = authorization.and_then(|h| h.strip_prefix("Basic ")) else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(raw.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    credentials
        .split_once(':')
        .map(|(login, key)| login == "Paycom" && key == merchant_key)
        .unwrap_or(false)
}

fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

fn result_response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Numeric transaction state as Payme defines it.
fn transaction_state(status: PaymentStatus) -> i64 {
    match status {
        PaymentStatus::Pending => 1,
        PaymentStatus::Paid => 2,
        PaymentStatus::Rejected | PaymentStatus::Cancelled => -2,
    }
}

/// The authentication failure body, returned before the method dispatch.
pub fn auth_error(body: &Value) -> Value {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    error_response(&id, codes::INVALID_AUTH, "Invalid authorization")
}

/// Dispatch one JSON-RPC request against the payments table.
///
/// Database errors surface as CannotPerform so Payme retries later.
pub fn process_request(conn: &DbConnection, body: &Value) -> Value {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or("");
    let params = body.get("params").cloned().unwrap_or_else(|| json!({}));

    let outcome = match method {
        "CheckPerformTransaction" => check_perform(conn, &params),
        "CreateTransaction" => create_transaction(conn, &params),
        "PerformTransaction" => perform_transaction(conn, &params),
        "CancelTransaction" => cancel_transaction(conn, &params),
        "CheckTransaction" => check_transaction(conn, &params),
        _ => Err((codes::METHOD_NOT_FOUND, "Method not found".to_string())),
    };

    match outcome {
        Ok(result) => result_response(&id, result),
        Err((code, message)) => error_response(&id, code, &message),
    }
}

type RpcOutcome = Result<Value, (i64, String)>;

fn payment_id_from_account(params: &Value) -> Option<i64> {
    let account = params.get("account")?;
    match account.get("payment_id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn find_payment(conn: &DbConnection, params: &Value) -> RpcOutcome {
    let Some(payment_id) = payment_id_from_account(params) else {
        return Err((codes::PAYMENT_NOT_FOUND, "Payment not found".to_string()));
    };
    match payments::find_payment_by_id(conn, payment_id) {
        Ok(Some(payment)) => Ok(json!({
            "id": payment.id,
            "amount": payment.amount,
            "status": payment.status.as_str(),
            "user_id": payment.user_id,
            "duration_days": payment.duration_days,
        })),
        Ok(None) => Err((codes::PAYMENT_NOT_FOUND, "Payment not found".to_string())),
        Err(e) => Err((codes::CANNOT_PERFORM, format!("Database error: {e}"))),
    }
}

fn check_perform(conn: &DbConnection, params: &Value) -> RpcOutcome {
    let payment = find_payment(conn, params)?;
    if payment["status"] != "pending" {
        return Err((codes::CANNOT_PERFORM, "Payment is not pending".to_string()));
    }

    let expected_tiyin = payment["amount"].as_i64().unwrap_or(0) * 100;
    let amount = params.get("amount").and_then(Value::as_i64).unwrap_or(0);
    if amount != expected_tiyin {
        return Err((codes::WRONG_AMOUNT, "Wrong amount".to_string()));
    }

    Ok(json!({ "allow": true }))
}

fn create_transaction(conn: &DbConnection, params: &Value) -> RpcOutcome {
    let transaction_id = params
        .get("id")
        .and_then(Value::as_str)
        .ok_or((codes::TRANSACTION_NOT_FOUND, "Missing transaction id".to_string()))?;

    let payment = find_payment(conn, params)?;
    let payment_id = payment["id"].as_i64().unwrap_or(0);

    let row = payments::find_payment_by_id(conn, payment_id)
        .map_err(|e| (codes::CANNOT_PERFORM, format!("Database error: {e}")))?
        .ok_or((codes::PAYMENT_NOT_FOUND, "Payment not found".to_string()))?;

    match row.payme_transaction_id.as_deref() {
        Some(existing) if existing != transaction_id => {
            return Err((codes::CANNOT_PERFORM, "Payment already has a transaction".to_string()));
        }
        Some(_) => {}
        None => {
            if row.status != PaymentStatus::Pending {
                return Err((codes::CANNOT_PERFORM, "Payment is not pending".to_string()));
            }
            payments::attach_payme_transaction(conn, payment_id, transaction_id)
                .map_err(|e| (codes::CANNOT_PERFORM, format!("Database error: {e}")))?;
        }
    }

    Ok(json!({
        "create_time": Utc::now().timestamp_millis(),
        "transaction": payment_id.to_string(),
        "state": 1,
    }))
}

fn find_by_transaction(conn: &DbConnection, params: &Value) -> Result<payments::Payment, (i64, String)> {
    let transaction_id = params
        .get("id")
        .and_then(Value::as_str)
        .ok_or((codes::TRANSACTION_NOT_FOUND, "Missing transaction id".to_string()))?;
    payments::find_payment_by_payme_transaction(conn, transaction_id)
        .map_err(|e| (codes::CANNOT_PERFORM, format!("Database error: {e}")))?
        .ok_or((codes::TRANSACTION_NOT_FOUND, "Transaction not found".to_string()))
}

fn perform_transaction(conn: &DbConnection, params: &Value) -> RpcOutcome {
    let payment = find_by_transaction(conn, params)?;

    if payment.status == PaymentStatus::Pending {
        payments::set_payment_status(conn, payment.id, PaymentStatus::Paid)
            .map_err(|e| (codes::CANNOT_PERFORM, format!("Database error: {e}")))?;
        users::grant_premium(conn, payment.user_id, payment.duration_days)
            .map_err(|e| (codes::CANNOT_PERFORM, format!("Database error: {e}")))?;
        log::info!(
            "Payme payment {} performed, premium granted to user {} for {} days",
            payment.id,
            payment.user_id,
            payment.duration_days
        );
    } else if payment.status != PaymentStatus::Paid {
        return Err((codes::CANNOT_PERFORM, "Transaction is cancelled".to_string()));
    }

    Ok(json!({
        "transaction": payment.id.to_string(),
        "perform_time": Utc::now().timestamp_millis(),
        "state": 2,
    }))
}

fn cancel_transaction(conn: &DbConnection, params: &Value) -> RpcOutcome {
    let payment = find_by_transaction(conn, params)?;

    if payment.status != PaymentStatus::Cancelled {
        payments::set_payment_status(conn, payment.id, PaymentStatus::Cancelled)
            .map_err(|e| (codes::CANNOT_PERFORM, format!("Database error: {e}")))?;
        log::info!("Payme payment {} cancelled", payment.id);
    }

    Ok(json!({
        "transaction": payment.id.to_string(),
        "cancel_time": Utc::now().timestamp_millis(),
        "state": -2,
    }))
}

fn check_transaction(conn: &DbConnection, params: &Value) -> RpcOutcome {
    let payment = find_by_transaction(conn, params)?;
    Ok(json!({
        "transaction": payment.id.to_string(),
        "state": transaction_state(payment.status),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::{create_pool, get_connection};
    use crate::storage::payments::create_payment;
    use pretty_assertions::assert_eq;

    fn test_conn() -> (tempfile::TempDir, DbConnection) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();
        (dir, conn)
    }

    #[test]
    fn checkout_link_encodes_tiyin_amount() {
        let link = checkout_link("https://checkout.paycom.uz", "merchant1", 7, 15_000);
        let encoded = link.rsplit('/').next().unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, "m=merchant1;ac.payment_id=7;a=1500000");
        assert!(link.starts_with("https://checkout.paycom.uz/"));
    }

    #[test]
    fn auth_accepts_only_paycom_with_matching_key() {
        let header = format!("Basic {}", BASE64.encode("Paycom:secret"));
        assert!(verify_auth(Some(&header), "secret"));
        assert!(!verify_auth(Some(&header), "other"));
        assert!(!verify_auth(Some("Basic not-base64!!"), "secret"));
        assert!(!verify_auth(None, "secret"));

        let wrong_login = format!("Basic {}", BASE64.encode("Someone:secret"));
        assert!(!verify_auth(Some(&wrong_login), "secret"));
    }

    #[test]
    fn full_payme_flow_grants_premium() {
        let (_dir, conn) = test_conn();
        users::find_or_create(&conn, 42, Some("Ali"), None, None).unwrap();
        let payment_id = create_payment(&conn, 42, 15_000, 30, "payme", None).unwrap();

        let check = process_request(
            &conn,
            &json!({
                "id": 1,
                "method": "CheckPerformTransaction",
                "params": { "amount": 1_500_000, "account": { "payment_id": payment_id } }
            }),
        );
        assert_eq!(check["result"]["allow"], true);

        let create = process_request(
            &conn,
            &json!({
                "id": 2,
                "method": "CreateTransaction",
                "params": { "id": "tx-1", "account": { "payment_id": payment_id } }
            }),
        );
        assert_eq!(create["result"]["state"], 1);

        let perform = process_request(
            &conn,
            &json!({ "id": 3, "method": "PerformTransaction", "params": { "id": "tx-1" } }),
        );
        assert_eq!(perform["result"]["state"], 2);
        assert!(users::is_premium_active(&conn, 42).unwrap());

        // Performing again is idempotent
        let again = process_request(
            &conn,
            &json!({ "id": 4, "method": "PerformTransaction", "params": { "id": "tx-1" } }),
        );
        assert_eq!(again["result"]["state"], 2);
    }

    #[test]
    fn wrong_amount_is_rejected() {
        let (_dir, conn) = test_conn();
        let payment_id = create_payment(&conn, 42, 15_000, 30, "payme", None).unwrap();

        let check = process_request(
            &conn,
            &json!({
                "id": 1,
                "method": "CheckPerformTransaction",
                "params": { "amount": 999, "account": { "payment_id": payment_id } }
            }),
        );
        assert_eq!(check["error"]["code"], codes::WRONG_AMOUNT);
    }

    #[test]
    fn unknown_transaction_and_method() {
        let (_dir, conn) = test_conn();

        let check = process_request(
            &conn,
            &json!({ "id": 1, "method": "CheckTransaction", "params": { "id": "tx-none" } }),
        );
        assert_eq!(check["error"]["code"], codes::TRANSACTION_NOT_FOUND);

        let bogus = process_request(&conn, &json!({ "id": 2, "method": "Bogus", "params": {} }));
        assert_eq!(bogus["error"]["code"], codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn second_transaction_for_same_payment_is_refused() {
        let (_dir, conn) = test_conn();
        let payment_id = create_payment(&conn, 42, 15_000, 30, "payme", None).unwrap();

        process_request(
            &conn,
            &json!({
                "id": 1,
                "method": "CreateTransaction",
                "params": { "id": "tx-1", "account": { "payment_id": payment_id } }
            }),
        );
        let second = process_request(
            &conn,
            &json!({
                "id": 2,
                "method": "CreateTransaction",
                "params": { "id": "tx-2", "account": { "payment_id": payment_id } }
            }),
        );
        assert_eq!(second["error"]["code"], codes::CANNOT_PERFORM);
    }
}
