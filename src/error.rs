use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Receipts are enabled but tax codes are not configured")]
    ReceiptNotConfigured,

    #[error("A buyer email is required to issue a receipt")]
    ReceiptEmailRequired,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared user-facing message strings, kept in one place so handlers and
/// tests agree on exact wording.
pub mod msg {
    pub const COURSE_NOT_FOUND: &str = "Course not found";
    pub const PURCHASE_NOT_FOUND: &str = "Purchase not found";
    pub const PAYMENTS_NOT_CONFIGURED: &str = "Payment provider is not configured";
    pub const DUPLICATE_ORDER: &str = "Order already exists";
    pub const COURSE_NOT_PURCHASABLE: &str = "Course has no purchasable price";
    pub const TERMINAL_KEY_MISMATCH: &str = "Terminal key mismatch";
    pub const NOTIFY_TOKEN_MISMATCH: &str = "Notification token mismatch";
}

/// Extension trait for `Option` that converts `None` into a 404 error.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::NotConfigured(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Not configured", Some(msg.clone()))
            }
            AppError::Provider(msg) => {
                // Raw provider payloads are logged where they occur; only our own
                // summary text ever reaches the client.
                tracing::warn!("Provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider error", Some(msg.clone()))
            }
            AppError::ReceiptNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Receipts not configured",
                Some(self.to_string()),
            ),
            AppError::ReceiptEmailRequired => (
                StatusCode::BAD_REQUEST,
                "Receipt email required",
                Some(self.to_string()),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
