//! # Reservation Repository
//!
//! Storage side of the reservation ledger: the `bundles.reserved_open`
//! counter.
//!
//! ## Atomicity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  adjust(bundle, delta)                                                  │
//! │                                                                         │
//! │  UPDATE bundles                                                         │
//! │     SET reserved_open = MAX(0, reserved_open + delta)                   │
//! │   WHERE id = bundle                                                     │
//! │  RETURNING reserved_open                                                │
//! │                                                                         │
//! │  One statement: no read-then-write window, clamps at 0 in SQL.          │
//! │                                                                         │
//! │  reconcile(bundle)                                                      │
//! │  BEGIN                                                                  │
//! │    read counter → sum open orders → write sum                           │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::order::fetch_open_orders_containing_bundle;
use combo_core::ledger::recompute_reserved;

/// Outcome of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub previous: i64,
    pub recomputed: i64,
    /// `previous != recomputed`.
    pub corrected: bool,
}

/// Repository for the reservation counter.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Applies a signed delta atomically and returns the new counter.
    ///
    /// The counter never goes below 0, whatever the order or size of calls.
    pub async fn adjust(&self, bundle_id: &str, delta: i64) -> DbResult<i64> {
        let reserved: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE bundles
               SET reserved_open = MAX(0, reserved_open + ?2),
                   updated_at = ?3
             WHERE id = ?1
            RETURNING reserved_open
            "#,
        )
        .bind(bundle_id)
        .bind(delta)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let reserved = reserved.ok_or_else(|| DbError::not_found("Bundle", bundle_id))?;
        debug!(bundle_id = %bundle_id, delta, reserved, "Adjusted reservation counter");
        Ok(reserved)
    }

    /// Order entered a paid, not yet fulfilled state.
    pub async fn increment(&self, bundle_id: &str, qty: i64) -> DbResult<i64> {
        self.adjust(bundle_id, qty.max(0)).await
    }

    /// Order was fulfilled or cancelled. Clamped at 0.
    pub async fn decrement(&self, bundle_id: &str, qty: i64) -> DbResult<i64> {
        self.adjust(bundle_id, -qty.max(0)).await
    }

    /// Current counter value.
    pub async fn get(&self, bundle_id: &str) -> DbResult<i64> {
        let reserved: Option<i64> = sqlx::query_scalar("SELECT reserved_open FROM bundles WHERE id = ?1")
            .bind(bundle_id)
            .fetch_optional(&self.pool)
            .await?;
        reserved.ok_or_else(|| DbError::not_found("Bundle", bundle_id))
    }

    /// Recomputes the counter from open orders and replaces it.
    ///
    /// Idempotent. The scan and the write share one transaction so a
    /// concurrent `adjust` cannot land between them.
    pub async fn reconcile(&self, bundle_id: &str) -> DbResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading.
        let previous: Option<i64> = sqlx::query_scalar(
            "UPDATE bundles SET version = version WHERE id = ?1 RETURNING reserved_open",
        )
        .bind(bundle_id)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = previous.ok_or_else(|| DbError::not_found("Bundle", bundle_id))?;

        let open_orders = fetch_open_orders_containing_bundle(&mut tx, bundle_id).await?;
        let recomputed = recompute_reserved(&open_orders);

        if recomputed != previous {
            sqlx::query("UPDATE bundles SET reserved_open = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(bundle_id)
                .bind(recomputed)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        let outcome = ReconcileOutcome {
            previous,
            recomputed,
            corrected: previous != recomputed,
        };
        if outcome.corrected {
            info!(
                bundle_id = %bundle_id,
                previous,
                recomputed,
                "Reservation counter corrected"
            );
        }
        Ok(outcome)
    }
}
