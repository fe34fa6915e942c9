//! Periodic reconciliation of purchases that neither the webhook nor the
//! client poll has resolved.
//!
//! Exclusivity across ticks and server instances comes from the lock-token
//! protocol: a claim writes a synthetic `reconciling:<ms>:<nonce>:<prev>`
//! status via compare-and-swap, and every subsequent write is guarded by
//! that exact token. No lock table, no external lock service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::db::queries::{self, PurchaseUpdate};
use crate::db::AppState;
use crate::error::Result;
use crate::models::{is_terminal_status, normalize_status, Purchase, PurchaseStatus, ReconcileLock};
use crate::payments::{TbankClient, PROVIDER_TBANK};
use crate::settlement;

/// How long a claim stays valid before another tick may reclaim it. Long
/// enough to cover a full provider call at worst-case timeout.
pub const LOCK_TTL_MS: i64 = 120_000;

/// Per-tick counters, logged after every sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub examined: usize,
    pub settled: usize,
    pub released: usize,
    pub skipped: usize,
}

enum CandidateOutcome {
    /// Reached a terminal status; row converged and lock consumed.
    Settled,
    /// Lock released, row restored to its pre-lock status for a later tick.
    Released,
    /// Not claimed: terminal already, fresh foreign lock, or lost the race.
    Skipped,
}

pub struct Reconciler {
    state: AppState,
    interval: Duration,
    lookback: Duration,
    batch: i64,
    running: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(state: AppState, config: &Config) -> Self {
        Self {
            state,
            interval: config.reconcile.interval,
            lookback: config.reconcile.lookback,
            batch: config.reconcile.batch,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the loop forever on a fixed interval.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tracing::info!(
            "Reconciler started: interval={}s lookback={}h batch={}",
            self.interval.as_secs(),
            self.lookback.as_secs() / 3600,
            self.batch
        );
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                self.tick().await;
            }
        })
    }

    /// One sweep. Single-flight: an overlapping tick within this process
    /// returns immediately without touching the store.
    pub async fn tick(&self) -> TickStats {
        let mut stats = TickStats::default();

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Reconcile tick skipped: previous tick still running");
            return stats;
        }

        let result = self.run_batch(&mut stats).await;
        self.running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => tracing::info!(
                "Reconcile tick done: examined={} settled={} released={} skipped={}",
                stats.examined,
                stats.settled,
                stats.released,
                stats.skipped
            ),
            Err(e) => tracing::warn!("Reconcile tick aborted: {}", e),
        }

        stats
    }

    async fn run_batch(&self, stats: &mut TickStats) -> Result<()> {
        let Some(tbank) = self.state.tbank.clone() else {
            tracing::debug!("Reconcile tick skipped: provider not configured");
            return Ok(());
        };

        let cutoff = queries::now() - self.lookback.as_secs() as i64;
        let candidates = {
            let conn = self.state.db.get()?;
            queries::list_reconcile_candidates(&conn, PROVIDER_TBANK, cutoff, self.batch)?
        };

        for purchase in candidates {
            stats.examined += 1;
            // One candidate's failure must never abort the batch.
            match self.process_candidate(&tbank, &purchase).await {
                Ok(CandidateOutcome::Settled) => stats.settled += 1,
                Ok(CandidateOutcome::Released) => stats.released += 1,
                Ok(CandidateOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    stats.skipped += 1;
                    tracing::warn!(
                        "Reconcile failed for order {}: {}",
                        purchase.order_id,
                        e
                    );
                }
            }
        }

        Ok(())
    }

    async fn process_candidate(
        &self,
        tbank: &TbankClient,
        purchase: &Purchase,
    ) -> Result<CandidateOutcome> {
        let now_ms = Utc::now().timestamp_millis();

        // Decide whether the row is claimable and what status to restore on
        // release. An unexpired foreign lock means another actor owns it.
        let previous = match &purchase.status {
            PurchaseStatus::Business(s) if is_terminal_status(s) => {
                return Ok(CandidateOutcome::Skipped);
            }
            PurchaseStatus::Business(s) => s.clone(),
            PurchaseStatus::Lock(lock) if !lock.is_expired(now_ms, LOCK_TTL_MS) => {
                return Ok(CandidateOutcome::Skipped);
            }
            PurchaseStatus::Lock(lock) => {
                tracing::info!(
                    "Reclaiming expired lock on order {} (claimed {}ms ago)",
                    purchase.order_id,
                    now_ms - lock.claimed_at_ms
                );
                lock.previous.clone()
            }
        };

        let lock = ReconcileLock::claim(now_ms, previous);
        let lock_status = PurchaseStatus::Lock(lock.clone());

        let claimed = {
            let conn = self.state.db.get()?;
            PurchaseUpdate::new(&purchase.id)
                .set_status(&lock_status)
                .expect_status(&purchase.status)
                .execute(&conn)?
        };
        if claimed == 0 {
            // Another tick or instance won the race.
            return Ok(CandidateOutcome::Skipped);
        }

        let Some(payment_id) = purchase.payment_id.as_deref() else {
            // Candidates are filtered on payment_id IS NOT NULL; stale reads
            // can still race an insert path, so release rather than trust it.
            self.release(&purchase.id, &lock)?;
            return Ok(CandidateOutcome::Released);
        };

        match tbank.get_state(payment_id).await {
            Ok(state) if is_terminal_status(&normalize_status(&state.status)) => {
                let conn = self.state.db.get()?;
                let row = settlement::apply_provider_state(
                    &conn,
                    &purchase.id,
                    &state.status,
                    state.payment_id.as_deref(),
                    Some(&lock),
                )?;
                tracing::info!(
                    "Reconciled order {} to status {}",
                    row.order_id,
                    row.status
                );
                Ok(CandidateOutcome::Settled)
            }
            Ok(state) => {
                tracing::debug!(
                    "Order {} still {} at provider, releasing lock",
                    purchase.order_id,
                    state.status
                );
                self.release(&purchase.id, &lock)?;
                Ok(CandidateOutcome::Released)
            }
            Err(e) => {
                tracing::warn!(
                    "Provider state query failed for order {}: {}",
                    purchase.order_id,
                    e
                );
                self.release(&purchase.id, &lock)?;
                Ok(CandidateOutcome::Released)
            }
        }
    }

    /// Restore the pre-lock status, guarded by the token so only the holder
    /// can release. A zero row count means someone else already settled the
    /// row; that is not an error.
    fn release(&self, purchase_id: &str, lock: &ReconcileLock) -> Result<()> {
        let conn = self.state.db.get()?;
        let restored = PurchaseUpdate::new(purchase_id)
            .set_status(&PurchaseStatus::Business(lock.previous.clone()))
            .expect_status(&PurchaseStatus::Lock(lock.clone()))
            .execute(&conn)?;
        if restored == 0 {
            tracing::debug!("Lock on purchase {} already superseded", purchase_id);
        }
        Ok(())
    }
}
