//! Idempotent course access grants.
//!
//! Called by every settlement path the moment a purchase is observed paid.
//! Failures here are soft: the caller's flow continues and the next Sync or
//! reconcile pass retries the grant.

use rusqlite::{params, Connection};

use crate::db::queries;
use crate::id::EntityType;

/// Grant a user access to a course. Returns whether the pair now has a grant
/// (freshly inserted or already present); `false` only on store failure.
pub fn grant_course_access(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    purchase_id: &str,
) -> bool {
    let id = EntityType::AccessGrant.gen_id();
    let result = conn.execute(
        "INSERT INTO access_grants (id, user_id, course_id, purchase_id, status, granted_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5)
         ON CONFLICT(user_id, course_id) DO NOTHING",
        params![id, user_id, course_id, purchase_id, queries::now()],
    );

    match result {
        Ok(0) => {
            tracing::debug!("Access already granted: user={} course={}", user_id, course_id);
            true
        }
        Ok(_) => {
            tracing::info!("Access granted: user={} course={}", user_id, course_id);
            true
        }
        Err(e) if is_missing_conflict_target(&e) => {
            // Legacy schema without the (user_id, course_id) unique constraint.
            legacy_upsert(conn, user_id, course_id, purchase_id)
        }
        Err(e) => {
            tracing::error!(
                "Failed to grant access: user={} course={}: {}",
                user_id,
                course_id,
                e
            );
            false
        }
    }
}

/// SQLite rejects ON CONFLICT targets that don't name an existing unique
/// constraint with a specific parse-time error.
fn is_missing_conflict_target(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(message))
            if message.contains("ON CONFLICT clause does not match")
    )
}

fn legacy_upsert(conn: &Connection, user_id: &str, course_id: &str, purchase_id: &str) -> bool {
    let existing: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM access_grants WHERE user_id = ?1 AND course_id = ?2",
            params![user_id, course_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        });

    let result = match existing {
        Ok(Some(grant_id)) => conn
            .execute(
                "UPDATE access_grants SET status = 'active' WHERE id = ?1",
                params![grant_id],
            )
            .map(|_| ()),
        Ok(None) => conn
            .execute(
                "INSERT INTO access_grants (id, user_id, course_id, purchase_id, status, granted_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
                params![
                    EntityType::AccessGrant.gen_id(),
                    user_id,
                    course_id,
                    purchase_id,
                    queries::now()
                ],
            )
            .map(|_| ()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                "Legacy grant upsert failed: user={} course={}: {}",
                user_id,
                course_id,
                e
            );
            false
        }
    }
}
