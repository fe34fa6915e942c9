use chrono::Utc;
use rusqlite::{params, types::Value, Connection};

use crate::error::{msg, AppError, Result};
use crate::id::EntityType;
use crate::models::{
    AccessGrant, Course, CreateCourse, CreatePurchase, Purchase, PurchaseStatus, FAILED_STATUSES,
    PAID_STATUSES,
};

use super::from_row::{query_all, query_one, ACCESS_GRANT_COLS, COURSE_COLS, PURCHASE_COLS};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// SQL list of the terminal statuses, for NOT IN / IN guards.
/// The values are static lowercase literals, so inlining them is safe.
fn terminal_status_list() -> String {
    PAID_STATUSES
        .iter()
        .chain(FAILED_STATUSES.iter())
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

fn paid_status_list() -> String {
    PAID_STATUSES
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builder for single-statement conditional UPDATEs against a purchase row.
///
/// This compare-and-swap primitive is the sole concurrency-control device in
/// the system: every mutation from Notify, Sync and the reconciler goes
/// through it, and `execute` reports how many rows actually changed (0 or 1)
/// so callers can tell whether they won the race.
pub struct PurchaseUpdate<'a> {
    id: &'a str,
    /// SET fragments, each with exactly one `?` placeholder.
    sets: Vec<(&'static str, Value)>,
    guards: Vec<String>,
    guard_params: Vec<Value>,
}

impl<'a> PurchaseUpdate<'a> {
    pub fn new(purchase_id: &'a str) -> Self {
        Self {
            id: purchase_id,
            sets: Vec::new(),
            guards: Vec::new(),
            guard_params: Vec::new(),
        }
    }

    pub fn set_status(mut self, status: &PurchaseStatus) -> Self {
        self.sets.push(("status = ?", Value::Text(status.to_string())));
        self
    }

    pub fn set_paid_at(mut self, paid_at: i64) -> Self {
        self.sets.push(("paid_at = ?", Value::Integer(paid_at)));
        self
    }

    /// Record the provider correlation id. First writer wins: an already-set
    /// payment_id is never overwritten (COALESCE keeps the existing value).
    pub fn set_payment_id(mut self, payment_id: &str) -> Self {
        self.sets.push((
            "payment_id = COALESCE(payment_id, ?)",
            Value::Text(payment_id.to_string()),
        ));
        self
    }

    /// Only apply if the status column still holds exactly this value.
    pub fn expect_status(mut self, status: &PurchaseStatus) -> Self {
        self.guards.push("status = ?".to_string());
        self.guard_params.push(Value::Text(status.to_string()));
        self
    }

    /// Only apply while no terminal outcome has been recorded.
    pub fn expect_not_terminal(mut self) -> Self {
        self.guards
            .push(format!("LOWER(status) NOT IN ({})", terminal_status_list()));
        self
    }

    /// Only apply if the row is not yet marked paid.
    pub fn expect_paid_at_null(mut self) -> Self {
        self.guards.push("paid_at IS NULL".to_string());
        self
    }

    /// Only apply if the status is already in the paid family (backfill path).
    pub fn expect_status_paid_family(mut self) -> Self {
        self.guards
            .push(format!("LOWER(status) IN ({})", paid_status_list()));
        self
    }

    /// Only apply while the provider correlation id is unset.
    pub fn expect_payment_id_null(mut self) -> Self {
        self.guards.push("payment_id IS NULL".to_string());
        self
    }

    /// Run the update; returns the number of rows changed (0 or 1).
    pub fn execute(self, conn: &Connection) -> Result<usize> {
        if self.sets.is_empty() {
            return Ok(0);
        }
        let set_clause = self
            .sets
            .iter()
            .map(|(fragment, _)| *fragment)
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE purchases SET {} WHERE id = ?", set_clause);
        for guard in &self.guards {
            sql.push_str(" AND ");
            sql.push_str(guard);
        }

        let mut values: Vec<Value> = self.sets.into_iter().map(|(_, v)| v).collect();
        values.push(Value::Text(self.id.to_string()));
        values.extend(self.guard_params);

        let changed = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(changed)
    }
}

fn is_unique_violation(err: &rusqlite::Error, constraint: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(message)) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation && message.contains(constraint)
        }
        _ => false,
    }
}

// ============ Purchases ============

pub fn create_purchase(conn: &Connection, input: &CreatePurchase) -> Result<Purchase> {
    let id = EntityType::Purchase.gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO purchases (id, order_id, user_id, course_id, amount_minor, provider, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'initiated', ?7)",
        params![
            id,
            input.order_id,
            input.user_id,
            input.course_id,
            input.amount_minor,
            input.provider,
            created_at
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e, "purchases.order_id") {
            AppError::Conflict(msg::DUPLICATE_ORDER.into())
        } else {
            e.into()
        }
    })?;

    Ok(Purchase {
        id,
        order_id: input.order_id.clone(),
        user_id: input.user_id.clone(),
        course_id: input.course_id.clone(),
        amount_minor: input.amount_minor,
        provider: input.provider.clone(),
        payment_id: None,
        status: PurchaseStatus::Business("initiated".to_string()),
        paid_at: None,
        created_at,
    })
}

pub fn get_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        &[&id],
    )
}

pub fn get_purchase_by_order_id(conn: &Connection, order_id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE order_id = ?1", PURCHASE_COLS),
        &[&order_id],
    )
}

/// Scoped lookup for the poll path: a user can only sync their own orders.
pub fn get_purchase_for_user(
    conn: &Connection,
    user_id: &str,
    order_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE user_id = ?1 AND order_id = ?2",
            PURCHASE_COLS
        ),
        &[&user_id, &order_id],
    )
}

pub fn list_purchases_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Purchase>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE user_id = ?1 ORDER BY created_at DESC",
            PURCHASE_COLS
        ),
        &[&user_id],
    )
}

/// Purchases the webhook and poll paths have not resolved yet: unpaid,
/// non-terminal, known to the provider, and recent enough to bother with.
/// Lock-token rows are included; the reconciler decides whether a token is
/// reclaimable.
pub fn list_reconcile_candidates(
    conn: &Connection,
    provider: &str,
    created_after: i64,
    limit: i64,
) -> Result<Vec<Purchase>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchases
             WHERE provider = ?1
               AND paid_at IS NULL
               AND payment_id IS NOT NULL
               AND LOWER(status) NOT IN ({})
               AND created_at >= ?2
             ORDER BY created_at DESC
             LIMIT ?3",
            PURCHASE_COLS,
            terminal_status_list()
        ),
        &[&provider, &created_after, &limit],
    )
}

// ============ Access grants ============

/// Grants held by a user, newest first. This is the read side of the
/// entitlement boundary; the course player checks access through it.
pub fn list_grants_for_user(conn: &Connection, user_id: &str) -> Result<Vec<AccessGrant>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM access_grants WHERE user_id = ?1 ORDER BY granted_at DESC",
            ACCESS_GRANT_COLS
        ),
        &[&user_id],
    )
}

// ============ Courses ============

pub fn create_course(conn: &Connection, input: &CreateCourse) -> Result<Course> {
    let id = EntityType::Course.gen_id();
    let created_at = now();
    conn.execute(
        "INSERT INTO courses (id, title, price, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, input.title, input.price, created_at],
    )?;
    Ok(Course {
        id,
        title: input.title.clone(),
        price: input.price,
        created_at,
    })
}

pub fn get_course_by_id(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

pub fn count_courses(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM courses", [], |row| row.get(0))?;
    Ok(count)
}
