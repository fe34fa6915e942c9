//! Client-facing purchase endpoints: initialize, sync (poll) and listing.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{AuthUser, Json};
use crate::id;
use crate::models::{Course, CreatePurchase, PurchaseStatus};
use crate::payments::{InitPayment, PROVIDER_TBANK};
use crate::settlement;

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub course_id: String,
}

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub payment_url: String,
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: String,
    pub course_id: String,
    pub paid_at: Option<i64>,
}

/// Pick the origin for success/fail redirect pages: the request's `Origin`
/// when allow-listed, else the first allow-listed origin, else our own base
/// URL. Never an arbitrary caller-supplied value.
fn resolve_redirect_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(origin) = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_end_matches('/'))
    {
        if state
            .allowed_origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
        {
            return origin.to_string();
        }
    }
    state
        .allowed_origins
        .first()
        .cloned()
        .unwrap_or_else(|| state.base_url.clone())
}

/// Build the fiscal receipt when receipts are enabled. Missing tax codes
/// fail the whole initialize; a receipt without a buyer email is invalid.
fn build_receipt(state: &AppState, email: Option<&str>, course: &Course, amount_minor: i64) -> Result<Option<Value>> {
    if !state.receipts.enabled {
        return Ok(None);
    }
    let (tax, taxation) = match (&state.receipts.tax, &state.receipts.taxation) {
        (Some(tax), Some(taxation)) => (tax, taxation),
        _ => return Err(AppError::ReceiptNotConfigured),
    };
    let email = email.ok_or(AppError::ReceiptEmailRequired)?;

    Ok(Some(json!({
        "Email": email,
        "Taxation": taxation,
        "Items": [{
            "Name": course.title,
            "Price": amount_minor,
            "Quantity": 1.0,
            "Amount": amount_minor,
            "Tax": tax,
        }],
    })))
}

pub async fn initialize(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<InitializeRequest>,
) -> Result<Json<InitializeResponse>> {
    let tbank = state.tbank()?.clone();

    // Reject malformed ids before touching the database.
    if !id::is_valid_prefixed_id(&request.course_id) {
        return Err(AppError::NotFound(msg::COURSE_NOT_FOUND.into()));
    }

    let course = {
        let conn = state.db.get()?;
        queries::get_course_by_id(&conn, &request.course_id)?.or_not_found(msg::COURSE_NOT_FOUND)?
    };
    if course.price <= 0 {
        return Err(AppError::BadRequest(msg::COURSE_NOT_PURCHASABLE.into()));
    }

    let amount_minor = course.price * 100;
    let order_id = id::gen_order_id();

    // Receipt preconditions are checked before any row exists, so a
    // misconfigured deployment fails without side effects.
    let receipt = build_receipt(&state, user.email.as_deref(), &course, amount_minor)?;

    let purchase = {
        let conn = state.db.get()?;
        queries::create_purchase(
            &conn,
            &CreatePurchase {
                order_id: order_id.clone(),
                user_id: user.id.clone(),
                course_id: course.id.clone(),
                amount_minor,
                provider: PROVIDER_TBANK.to_string(),
            },
        )?
    };

    let origin = resolve_redirect_origin(&state, &headers);
    let notification_url = state
        .notification_url
        .clone()
        .unwrap_or_else(|| format!("{}/api/payments/notify", state.base_url));

    let init = InitPayment {
        amount_minor,
        order_id: order_id.clone(),
        description: course.title.clone(),
        success_url: format!("{}/payment/success?order={}", origin, order_id),
        fail_url: format!("{}/payment/fail?order={}", origin, order_id),
        notification_url,
        receipt,
    };

    let outcome = match tbank.init(&init).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Mark the attempt failed so the reconciler never picks it up,
            // then surface the provider error to the caller.
            let conn = state.db.get()?;
            queries::PurchaseUpdate::new(&purchase.id)
                .set_status(&PurchaseStatus::Business("failed".to_string()))
                .expect_not_terminal()
                .execute(&conn)?;
            return Err(e);
        }
    };

    {
        let conn = state.db.get()?;
        let raw = outcome.status.trim().to_ascii_lowercase();
        let status = if raw.is_empty() { "created".to_string() } else { raw };
        let applied = queries::PurchaseUpdate::new(&purchase.id)
            .set_payment_id(&outcome.payment_id)
            .set_status(&PurchaseStatus::Business(status))
            .expect_status(&purchase.status)
            .execute(&conn)?;
        if applied == 0 {
            // A webhook already advanced the row; still make sure the
            // correlation id is recorded (first writer wins).
            queries::PurchaseUpdate::new(&purchase.id)
                .set_payment_id(&outcome.payment_id)
                .expect_payment_id_null()
                .execute(&conn)?;
        }
    }

    Ok(Json(InitializeResponse {
        payment_url: outcome.payment_url,
        order_id,
    }))
}

/// Client-initiated poll: converge the row against the provider's state.
pub async fn sync(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let purchase = {
        let conn = state.db.get()?;
        queries::get_purchase_for_user(&conn, &user.id, &request.order_id)?
            .or_not_found(msg::PURCHASE_NOT_FOUND)?
    };

    // Nothing to reconcile until Init has produced a provider-side payment.
    let Some(payment_id) = purchase.payment_id.clone() else {
        return Ok(Json(SyncResponse {
            status: purchase.status.business().to_string(),
            course_id: purchase.course_id,
            paid_at: purchase.paid_at,
        }));
    };

    let tbank = state.tbank()?.clone();
    // Provider errors surface to the caller without mutating the row.
    let provider_state = tbank.get_state(&payment_id).await?;

    let conn = state.db.get()?;
    let row = settlement::apply_provider_state(
        &conn,
        &purchase.id,
        &provider_state.status,
        provider_state.payment_id.as_deref(),
        None,
    )?;

    Ok(Json(SyncResponse {
        status: row.status.business().to_string(),
        course_id: row.course_id,
        paid_at: row.paid_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct PurchaseView {
    pub order_id: String,
    pub course_id: String,
    pub amount_minor: i64,
    pub status: String,
    pub paid_at: Option<i64>,
    pub created_at: i64,
}

pub async fn list_purchases(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PurchaseView>>> {
    let conn = state.db.get()?;
    let purchases = queries::list_purchases_for_user(&conn, &user.id)?;
    Ok(Json(
        purchases
            .into_iter()
            .map(|p| PurchaseView {
                order_id: p.order_id,
                course_id: p.course_id,
                amount_minor: p.amount_minor,
                status: p.status.business().to_string(),
                paid_at: p.paid_at,
                created_at: p.created_at,
            })
            .collect(),
    ))
}
