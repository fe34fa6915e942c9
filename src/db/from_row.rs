//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::{AccessGrant, Course, Purchase, PurchaseStatus};

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PURCHASE_COLS: &str =
    "id, order_id, user_id, course_id, amount_minor, provider, payment_id, status, paid_at, created_at";

pub const ACCESS_GRANT_COLS: &str = "id, user_id, course_id, purchase_id, status, granted_at";

pub const COURSE_COLS: &str = "id, title, price, created_at";

// ============ FromRow Implementations ============

impl FromRow for Purchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status: String = row.get(7)?;
        Ok(Purchase {
            id: row.get(0)?,
            order_id: row.get(1)?,
            user_id: row.get(2)?,
            course_id: row.get(3)?,
            amount_minor: row.get(4)?,
            provider: row.get(5)?,
            payment_id: row.get(6)?,
            status: PurchaseStatus::parse(&status),
            paid_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl FromRow for AccessGrant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AccessGrant {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            purchase_id: row.get(3)?,
            status: row.get(4)?,
            granted_at: row.get(5)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            title: row.get(1)?,
            price: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}
