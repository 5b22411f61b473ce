//! # Reservation Ledger
//!
//! Keeps `bundle_reserved_open` in step with the order lifecycle.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Reservation Ledger                                 │
//! │                                                                         │
//! │  Order system                                                           │
//! │    │  (order_id, from, to, bundle_id, qty)                              │
//! │    ▼                                                                    │
//! │  apply_transition ──► reservation_delta(from, to, qty)                  │
//! │                          │  not open → open         : +qty              │
//! │                          │  open → not open         : -qty              │
//! │                          │  anything else           :  0 (no write)     │
//! │                          ▼                                              │
//! │                   reservations().adjust(bundle, delta)   atomic, ≥ 0    │
//! │                                                                         │
//! │  LedgerReconciler (periodic)                                            │
//! │    └── reconcile_all(): recompute every counter from open orders.       │
//! │        Single-flight per bundle across clones of one ledger, so a       │
//! │        manual reconcile and the periodic pass never race.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use combo_core::OrderTransition;
use combo_db::{Database, ReconcileOutcome};

use crate::error::EngineResult;
use crate::runtime::ShutdownHandle;
use crate::single_flight::SingleFlight;

/// Summary of a full reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReport {
    pub checked: usize,
    pub corrected: usize,
    /// Already being reconciled elsewhere.
    pub skipped: usize,
    pub failed: usize,
}

/// Service side of the reservation ledger.
#[derive(Debug, Clone)]
pub struct ReservationLedger {
    db: Arc<Database>,
    pub(crate) flights: SingleFlight,
}

impl ReservationLedger {
    pub fn new(db: Arc<Database>) -> Self {
        ReservationLedger {
            db,
            flights: SingleFlight::new(),
        }
    }

    /// True while a reconcile of `bundle_id` runs on this ledger or a clone.
    pub fn is_reconciling(&self, bundle_id: &str) -> bool {
        self.flights.is_in_flight(bundle_id)
    }

    /// Applies one order-state transition.
    ///
    /// Returns the new counter, or `None` when the transition does not
    /// touch reservations.
    pub async fn apply_transition(&self, transition: &OrderTransition) -> EngineResult<Option<i64>> {
        let delta = transition.delta();
        if delta == 0 {
            debug!(
                order_id = %transition.order_id,
                bundle_id = %transition.bundle_id,
                from = transition.from_state.as_str(),
                to = transition.to_state.as_str(),
                "Transition does not affect reservations"
            );
            return Ok(None);
        }

        let reserved = self.db.reservations().adjust(&transition.bundle_id, delta).await?;

        info!(
            order_id = %transition.order_id,
            bundle_id = %transition.bundle_id,
            from = transition.from_state.as_str(),
            to = transition.to_state.as_str(),
            delta,
            reserved,
            "Reservation counter updated"
        );
        Ok(Some(reserved))
    }

    /// Applies several transitions in order. Stops at the first failure.
    pub async fn apply_transitions(&self, transitions: &[OrderTransition]) -> EngineResult<Vec<Option<i64>>> {
        let mut results = Vec::with_capacity(transitions.len());
        for transition in transitions {
            results.push(self.apply_transition(transition).await?);
        }
        Ok(results)
    }

    /// `adjustReservation(bundleId, delta)`.
    pub async fn adjust(&self, bundle_id: &str, delta: i64) -> EngineResult<i64> {
        Ok(self.db.reservations().adjust(bundle_id, delta).await?)
    }

    /// Recomputes one counter from open orders.
    ///
    /// `None` when a reconciliation of the same bundle is already running.
    pub async fn reconcile(&self, bundle_id: &str) -> EngineResult<Option<ReconcileOutcome>> {
        let Some(_guard) = self.flights.try_acquire(bundle_id) else {
            debug!(bundle_id = %bundle_id, "Reconcile already in flight, skipping");
            return Ok(None);
        };

        let outcome = self.db.reservations().reconcile(bundle_id).await?;
        if outcome.corrected {
            warn!(
                bundle_id = %bundle_id,
                previous = outcome.previous,
                recomputed = outcome.recomputed,
                "Reservation counter drifted from open orders"
            );
        }
        Ok(Some(outcome))
    }

    /// Reconciles every bundle. Failures are logged and counted, not fatal.
    pub async fn reconcile_all(&self) -> EngineResult<LedgerReport> {
        let ids = self.db.bundles().list_ids().await?;
        let mut report = LedgerReport::default();

        for id in ids {
            report.checked += 1;
            match self.reconcile(&id).await {
                Ok(Some(outcome)) if outcome.corrected => report.corrected += 1,
                Ok(Some(_)) => {}
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(bundle_id = %id, error = %e, "Reconcile failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            corrected = report.corrected,
            skipped = report.skipped,
            failed = report.failed,
            "Reservation reconciliation complete"
        );
        Ok(report)
    }
}

// =============================================================================
// Periodic Reconciler
// =============================================================================

/// Background loop running [`ReservationLedger::reconcile_all`].
pub struct LedgerReconciler {
    ledger: ReservationLedger,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl LedgerReconciler {
    pub fn new(ledger: ReservationLedger, interval: Duration) -> (Self, ShutdownHandle) {
        let (handle, shutdown_rx) = ShutdownHandle::channel("ledger reconciler");
        (
            LedgerReconciler {
                ledger,
                interval,
                shutdown_rx,
            },
            handle,
        )
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Ledger reconciler starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.ledger.reconcile_all().await {
                        error!(error = %e, "Reservation reconciliation failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Ledger reconciler shutting down");
                    break;
                }
            }
        }

        info!("Ledger reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle, engine_db};
    use chrono::Utc;
    use combo_core::OrderState;

    fn transition(from: OrderState, to: OrderState, qty: i64) -> OrderTransition {
        OrderTransition {
            order_id: "o-1".to_string(),
            from_state: from,
            to_state: to,
            bundle_id: "b-1".to_string(),
            quantity: qty,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_moves_counter() {
        let db = engine_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        let ledger = ReservationLedger::new(db.clone());

        let paid = transition(OrderState::ArrangingPayment, OrderState::PaymentAuthorized, 2);
        assert_eq!(ledger.apply_transition(&paid).await.unwrap(), Some(2));

        let settled = transition(OrderState::PaymentAuthorized, OrderState::PaymentSettled, 2);
        assert_eq!(ledger.apply_transition(&settled).await.unwrap(), None);

        let delivered = transition(OrderState::PaymentSettled, OrderState::Delivered, 2);
        assert_eq!(ledger.apply_transition(&delivered).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_cancel_never_goes_negative() {
        let db = engine_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        let ledger = ReservationLedger::new(db.clone());

        let cancelled = transition(OrderState::PaymentSettled, OrderState::Cancelled, 5);
        assert_eq!(ledger.apply_transition(&cancelled).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_reconcile_all_repairs_drift() {
        let db = engine_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        db.bundles().insert(&bundle("b-2", &[("tent", 1, 2000)])).await.unwrap();
        db.stock().set_level("tent", "Tent", 20, 0).await.unwrap();

        let order = db.orders().create_order().await.unwrap();
        db.orders().add_bundle_lines(&order, "b-1", 3, Utc::now()).await.unwrap();
        db.orders().transition(&order, OrderState::PaymentSettled).await.unwrap();
        db.reservations().adjust("b-2", 4).await.unwrap();

        let ledger = ReservationLedger::new(db.clone());
        let report = ledger.reconcile_all().await.unwrap();
        assert_eq!(report, LedgerReport { checked: 2, corrected: 2, skipped: 0, failed: 0 });
        assert_eq!(db.reservations().get("b-1").await.unwrap(), 3);
        assert_eq!(db.reservations().get("b-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_is_single_flight() {
        let db = engine_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        let ledger = ReservationLedger::new(db.clone());

        let _held = ledger.flights.try_acquire("b-1").unwrap();
        assert_eq!(ledger.reconcile("b-1").await.unwrap(), None);
        assert_eq!(ledger.clone().reconcile("b-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_payment_rollback_releases_reservation() {
        let db = engine_db().await;
        db.bundles().insert(&bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        db.stock().set_level("tent", "Tent", 20, 0).await.unwrap();
        let ledger = ReservationLedger::new(db.clone());

        let order = db.orders().create_order().await.unwrap();
        db.orders().add_bundle_lines(&order, "b-1", 3, Utc::now()).await.unwrap();

        for state in [
            OrderState::ArrangingPayment,
            OrderState::PaymentAuthorized,
            OrderState::ArrangingPayment,
        ] {
            let transitions = db.orders().transition(&order, state).await.unwrap();
            ledger.apply_transitions(&transitions).await.unwrap();
        }
        assert_eq!(db.reservations().get("b-1").await.unwrap(), 0);
        assert!(db.orders().find_open_orders_containing_bundle("b-1").await.unwrap().is_empty());

        let transitions = db.orders().transition(&order, OrderState::PaymentAuthorized).await.unwrap();
        ledger.apply_transitions(&transitions).await.unwrap();
        assert_eq!(db.reservations().get("b-1").await.unwrap(), 3);
        assert_eq!(ledger.reconcile("b-1").await.unwrap().map(|o| o.corrected), Some(false));
    }
}
