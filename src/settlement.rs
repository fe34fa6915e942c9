//! The idempotent settlement sequence shared by Notify, Sync and the
//! reconciliation loop.
//!
//! All three paths funnel a provider-reported status through the same
//! ordered compare-and-swap sequence, so whichever path observes a terminal
//! outcome first wins and later non-terminal writes are rejected by the
//! guards. `paid_at` is monotonic: set at most once, never cleared.

use rusqlite::Connection;

use crate::db::queries::{self, PurchaseUpdate};
use crate::error::{msg, OptionExt, Result};
use crate::grants;
use crate::models::{is_paid_status, normalize_status, Purchase, PurchaseStatus, ReconcileLock};

/// Apply one provider-reported payment state to a purchase row.
///
/// Ordering is deliberate: the paid-state update runs first (it carries the
/// `paid_at IS NULL` guard), the paid_at backfill second, and the generic
/// status update last, guarded to never touch terminal rows. When `lock` is
/// given (reconciler path) every write is additionally guarded by
/// `status = <lock token>` so only the lock holder can commit.
///
/// Returns the re-read row after the sequence; access is granted (softly)
/// when the row shows paid.
pub fn apply_provider_state<'a>(
    conn: &Connection,
    purchase_id: &'a str,
    provider_status: &str,
    payment_id: Option<&str>,
    lock: Option<&ReconcileLock>,
) -> Result<Purchase> {
    let status = normalize_status(provider_status);
    let paid = is_paid_status(&status);
    let new_status = PurchaseStatus::Business(status);
    let lock_status = lock.map(|l| PurchaseStatus::Lock(l.clone()));
    let now = queries::now();

    let guard = |mut update: PurchaseUpdate<'a>| -> PurchaseUpdate<'a> {
        if let Some(ref lock_status) = lock_status {
            update = update.expect_status(lock_status);
        }
        update
    };

    if paid {
        // Common case: first paid confirmation claims paid_at, status and
        // payment_id in one atomic statement.
        let mut update = PurchaseUpdate::new(purchase_id)
            .set_status(&new_status)
            .set_paid_at(now)
            .expect_paid_at_null()
            .expect_not_terminal();
        if let Some(payment_id) = payment_id {
            update = update.set_payment_id(payment_id);
        }
        guard(update).execute(conn)?;

        // Backfill: a racing writer already set a paid-family status but
        // lost before recording paid_at.
        guard(
            PurchaseUpdate::new(purchase_id)
                .set_paid_at(now)
                .expect_paid_at_null()
                .expect_status_paid_family(),
        )
        .execute(conn)?;
    }

    // Keep the latest non-authoritative provider status visible without ever
    // clobbering a terminal outcome.
    guard(
        PurchaseUpdate::new(purchase_id)
            .set_status(&new_status)
            .expect_not_terminal(),
    )
    .execute(conn)?;

    let purchase =
        queries::get_purchase_by_id(conn, purchase_id)?.or_not_found(msg::PURCHASE_NOT_FOUND)?;

    if purchase.is_paid() {
        // Soft failure: the next Sync/reconcile pass retries the grant.
        grants::grant_course_access(conn, &purchase.user_id, &purchase.course_id, &purchase.id);
    }

    Ok(purchase)
}
