//! Provider webhook handler.
//!
//! The transport is unauthenticated; trust comes from the TerminalKey
//! equality check and the signed Token over the payload. Once a payload is
//! authenticated, the handler always answers `{ok:true}` — anything else
//! triggers provider retry storms — except for store failures, where a 500
//! makes the provider redeliver.

use axum::extract::State;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;
use crate::payments::token::TOKEN_FIELD;
use crate::settlement;

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub ok: bool,
}

fn field_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing field: {}", name)))
}

/// PaymentId arrives as string or number depending on the deployment.
fn field_payment_id(fields: &Map<String, Value>) -> Option<String> {
    match fields.get("PaymentId") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn notify(
    State(state): State<AppState>,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<NotifyResponse>> {
    let tbank = state.tbank()?;

    let terminal_key = field_str(&fields, "TerminalKey")?;
    let token = field_str(&fields, TOKEN_FIELD)?;
    let order_id = field_str(&fields, "OrderId")?;
    let status = field_str(&fields, "Status")?.to_string();
    let payment_id = field_payment_id(&fields);

    if terminal_key != tbank.terminal_key() {
        return Err(AppError::Forbidden(msg::TERMINAL_KEY_MISMATCH.into()));
    }
    if !tbank.verify_notification_token(&fields, token) {
        return Err(AppError::Forbidden(msg::NOTIFY_TOKEN_MISMATCH.into()));
    }

    let conn = state.db.get()?;

    let Some(purchase) = queries::get_purchase_by_order_id(&conn, order_id)? else {
        // An authenticated notification for an order we don't know is worth a
        // log line, but never a retry storm.
        tracing::warn!("Notification for unknown order {}", order_id);
        return Ok(Json(NotifyResponse { ok: true }));
    };

    let row = settlement::apply_provider_state(
        &conn,
        &purchase.id,
        &status,
        payment_id.as_deref(),
        None,
    )?;

    tracing::debug!(
        "Notification applied: order={} status={} paid_at={:?}",
        row.order_id,
        row.status,
        row.paid_at
    );

    Ok(Json(NotifyResponse { ok: true }))
}
