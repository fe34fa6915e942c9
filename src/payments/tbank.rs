use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

use crate::config::TbankConfig;
use crate::error::{AppError, Result};

use super::token::{self, DEFAULT_EXCLUDED, MODE_ORDER, TOKEN_FIELD};

/// Provider error code used (among other things) for signature rejections.
/// The code alone is not specific enough, so the message is matched too.
const GENERIC_ERROR_CODE: &str = "9999";

/// Client for the two T-Bank acquiring operations we consume: Init and
/// GetState. Each call is a bounded-timeout JSON POST, signed with the first
/// canonicalization mode the deployment accepts.
#[derive(Debug, Clone)]
pub struct TbankClient {
    http: reqwest::Client,
    base_url: String,
    terminal_key: String,
    password: String,
    slow_threshold: Duration,
}

/// Parameters for payment initialization.
#[derive(Debug)]
pub struct InitPayment {
    pub amount_minor: i64,
    pub order_id: String,
    pub description: String,
    pub success_url: String,
    pub fail_url: String,
    pub notification_url: String,
    /// Fiscal receipt object; excluded from signing.
    pub receipt: Option<Value>,
}

/// Successful Init reply.
#[derive(Debug)]
pub struct InitOutcome {
    pub payment_id: String,
    pub payment_url: String,
    /// Raw provider status at creation time (usually "NEW").
    pub status: String,
}

/// GetState reply.
#[derive(Debug)]
pub struct PaymentState {
    pub status: String,
    pub payment_id: Option<String>,
}

/// PaymentId arrives as a JSON string or a number depending on the
/// deployment; accept both.
fn de_opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct TbankReply {
    #[serde(rename = "Success", default)]
    success: bool,
    #[serde(rename = "ErrorCode", default)]
    error_code: String,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "Details")]
    details: Option<String>,
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "PaymentId", default, deserialize_with = "de_opt_string_or_number")]
    payment_id: Option<String>,
    #[serde(rename = "PaymentURL")]
    payment_url: Option<String>,
}

impl TbankReply {
    /// A rejection that means "your Token was computed with the wrong
    /// canonicalization", i.e. the next mode is worth trying.
    fn is_invalid_token(&self) -> bool {
        if self.success || self.error_code != GENERIC_ERROR_CODE {
            return false;
        }
        let text = format!(
            "{} {}",
            self.message.as_deref().unwrap_or_default(),
            self.details.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        text.contains("token") || text.contains("токен")
    }
}

impl TbankClient {
    pub fn new(config: &TbankConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            terminal_key: config.terminal_key.clone(),
            password: config.password.clone(),
            slow_threshold: config.slow_threshold,
        })
    }

    /// Terminal key, for webhook TerminalKey equality checks.
    pub fn terminal_key(&self) -> &str {
        &self.terminal_key
    }

    /// Verify an inbound webhook token against our password, any mode.
    pub fn verify_notification_token(&self, fields: &Map<String, Value>, candidate: &str) -> bool {
        token::verify(fields, &self.password, candidate, DEFAULT_EXCLUDED)
    }

    /// POST one operation, trying signature modes in fallback order.
    ///
    /// A transport failure (connect error, timeout) aborts immediately; an
    /// invalid-token rejection advances to the next mode; any other decoded
    /// reply ends the loop and is returned as-is for the caller to judge.
    async fn post_signed(
        &self,
        operation: &str,
        fields: &Map<String, Value>,
        unsigned_extra: Option<(&str, &Value)>,
    ) -> Result<TbankReply> {
        let url = format!("{}/{}", self.base_url, operation);

        for (attempt, mode) in MODE_ORDER.iter().enumerate() {
            let token = token::sign(fields, &self.password, *mode, DEFAULT_EXCLUDED);
            let mut body = fields.clone();
            if let Some((name, value)) = unsigned_extra {
                body.insert(name.to_string(), value.clone());
            }
            body.insert(TOKEN_FIELD.to_string(), Value::String(token));

            let started = Instant::now();
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    tracing::warn!("T-Bank {} transport failure: {}", operation, e);
                    AppError::Provider(format!("{} request failed", operation))
                })?;

            let reply: TbankReply = response.json().await.map_err(|e| {
                tracing::warn!("T-Bank {} returned undecodable body: {}", operation, e);
                AppError::Provider(format!("{} response invalid", operation))
            })?;

            let elapsed = started.elapsed();
            if elapsed > self.slow_threshold {
                tracing::warn!(
                    "Slow T-Bank {} call: {}ms (threshold {}ms)",
                    operation,
                    elapsed.as_millis(),
                    self.slow_threshold.as_millis()
                );
            }

            if reply.is_invalid_token() {
                tracing::debug!(
                    "T-Bank {} rejected token mode {:?} (attempt {}), trying next",
                    operation,
                    mode,
                    attempt + 1
                );
                continue;
            }

            return Ok(reply);
        }

        Err(AppError::Provider(format!(
            "{} rejected all signature modes",
            operation
        )))
    }

    /// Register a payment with the provider.
    pub async fn init(&self, payment: &InitPayment) -> Result<InitOutcome> {
        let Value::Object(fields) = json!({
            "TerminalKey": self.terminal_key,
            "Amount": payment.amount_minor,
            "OrderId": payment.order_id,
            "Description": payment.description,
            "SuccessURL": payment.success_url,
            "FailURL": payment.fail_url,
            "NotificationURL": payment.notification_url,
        }) else {
            unreachable!()
        };

        let reply = self
            .post_signed("Init", &fields, payment.receipt.as_ref().map(|r| ("Receipt", r)))
            .await?;

        if !reply.success {
            tracing::warn!(
                "T-Bank Init rejected order {}: code={} message={:?} details={:?}",
                payment.order_id,
                reply.error_code,
                reply.message,
                reply.details
            );
            return Err(AppError::Provider(format!(
                "Init rejected (code {})",
                reply.error_code
            )));
        }

        let payment_id = reply
            .payment_id
            .ok_or_else(|| AppError::Provider("Init reply missing PaymentId".into()))?;
        let payment_url = reply
            .payment_url
            .ok_or_else(|| AppError::Provider("Init reply missing PaymentURL".into()))?;

        Ok(InitOutcome {
            payment_id,
            payment_url,
            status: reply.status.unwrap_or_default(),
        })
    }

    /// Query the current provider-side state of a payment.
    pub async fn get_state(&self, payment_id: &str) -> Result<PaymentState> {
        let Value::Object(fields) = json!({
            "TerminalKey": self.terminal_key,
            "PaymentId": payment_id,
        }) else {
            unreachable!()
        };

        let reply = self.post_signed("GetState", &fields, None).await?;

        if !reply.success {
            tracing::warn!(
                "T-Bank GetState rejected payment {}: code={} message={:?}",
                payment_id,
                reply.error_code,
                reply.message
            );
            return Err(AppError::Provider(format!(
                "GetState rejected (code {})",
                reply.error_code
            )));
        }

        let status = reply
            .status
            .ok_or_else(|| AppError::Provider("GetState reply missing Status".into()))?;

        Ok(PaymentState {
            status,
            payment_id: reply.payment_id,
        })
    }
}
