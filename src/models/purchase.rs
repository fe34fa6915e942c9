use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Statuses from which no further business transition is permitted.
///
/// Both families are matched case-insensitively; persisted statuses are
/// normalized to lowercase at the store boundary.
pub const PAID_STATUSES: &[&str] = &[
    "paid",
    "succeeded",
    "success",
    "completed",
    "captured",
    "confirmed",
];

pub const FAILED_STATUSES: &[&str] = &[
    "failed", "rejected", "canceled", "cancelled", "refunded", "expired", "dead", "timeout",
];

pub fn is_paid_status(status: &str) -> bool {
    PAID_STATUSES.iter().any(|s| status.eq_ignore_ascii_case(s))
}

pub fn is_terminal_status(status: &str) -> bool {
    is_paid_status(status)
        || FAILED_STATUSES.iter().any(|s| status.eq_ignore_ascii_case(s))
}

/// Normalize a provider status string for persistence. The provider reports
/// uppercase states ("CONFIRMED"); we store lowercase throughout.
pub fn normalize_status(status: &str) -> String {
    status.trim().to_ascii_lowercase()
}

const LOCK_PREFIX: &str = "reconciling:";

/// Reconciliation claim written in place of the business status.
///
/// Serialized as `reconciling:<timestampMs>:<nonce>:<previousStatus>`. An
/// unexpired token on a row means another tick or instance owns it; an
/// expired one is reclaimable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileLock {
    pub claimed_at_ms: i64,
    pub nonce: String,
    /// Business status the row held before the claim; restored on release.
    pub previous: String,
}

impl ReconcileLock {
    pub fn claim(now_ms: i64, previous: String) -> Self {
        let nonce = Uuid::new_v4().as_simple().to_string()[..12].to_string();
        Self {
            claimed_at_ms: now_ms,
            nonce,
            previous,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(LOCK_PREFIX)?;
        let mut parts = rest.splitn(3, ':');
        let claimed_at_ms = parts.next()?.parse().ok()?;
        let nonce = parts.next()?.to_string();
        let previous = parts.next()?.to_string();
        Some(Self {
            claimed_at_ms,
            nonce,
            previous,
        })
    }

    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.claimed_at_ms >= ttl_ms
    }
}

impl fmt::Display for ReconcileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}:{}",
            LOCK_PREFIX, self.claimed_at_ms, self.nonce, self.previous
        )
    }
}

/// In-memory view of the persisted `status` column.
///
/// The column does double duty: normally it carries the business status, but
/// while the reconciler owns a row it carries a lock token instead. Keeping
/// the two cases as a tagged union means no string-prefix parsing leaks into
/// business logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseStatus {
    Business(String),
    Lock(ReconcileLock),
}

impl PurchaseStatus {
    pub fn parse(s: &str) -> Self {
        match ReconcileLock::parse(s) {
            Some(lock) => PurchaseStatus::Lock(lock),
            None => PurchaseStatus::Business(s.to_string()),
        }
    }

    /// The business-facing status: a lock token surfaces the status it
    /// displaced rather than the token itself.
    pub fn business(&self) -> &str {
        match self {
            PurchaseStatus::Business(s) => s,
            PurchaseStatus::Lock(lock) => &lock.previous,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStatus::Business(s) if is_terminal_status(s))
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, PurchaseStatus::Business(s) if is_paid_status(s))
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseStatus::Business(s) => f.write_str(s),
            PurchaseStatus::Lock(lock) => lock.fmt(f),
        }
    }
}

impl Serialize for PurchaseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// One row per checkout attempt. Rows are never deleted; the table is an
/// implicit audit trail of every initiated payment.
#[derive(Debug, Clone, Serialize)]
pub struct Purchase {
    pub id: String,
    /// Caller-generated correlation key, unique, echoed by the provider.
    pub order_id: String,
    pub user_id: String,
    pub course_id: String,
    /// Amount in the provider's smallest currency unit (kopecks).
    pub amount_minor: i64,
    pub provider: String,
    /// Provider-side payment id; set once Init succeeds, never cleared.
    pub payment_id: Option<String>,
    pub status: PurchaseStatus,
    /// Unix seconds; null until the first paid confirmation, then immutable.
    pub paid_at: Option<i64>,
    pub created_at: i64,
}

impl Purchase {
    /// Whether the row is settled as paid: paid-family status and paid_at set.
    pub fn is_paid(&self) -> bool {
        self.status.is_paid() && self.paid_at.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchase {
    pub order_id: String,
    pub user_id: String,
    pub course_id: String,
    pub amount_minor: i64,
    pub provider: String,
}
