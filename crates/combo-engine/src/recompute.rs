//! # Recompute Worker
//!
//! Drains the recompute queue and refreshes the derived data of each
//! bundle: health, availability and price totals.
//!
//! ## Processing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Recompute Worker Flow                                │
//! │                                                                         │
//! │  1. Poll: get_pending(batch_size, max_attempts)                         │
//! │                                                                         │
//! │  2. Group requests by bundle id                                         │
//! │                                                                         │
//! │  3. JoinSet: one task per distinct bundle                               │
//! │     ├── single-flight guard (skip if the bundle is already running)     │
//! │     ├── load definition + component statuses + stock                    │
//! │     ├── assess_health → cache().put_health                              │
//! │     └── healthy: compute_availability + allocate(1) → put_snapshot      │
//! │         broken:  drop the stale snapshot                                │
//! │                                                                         │
//! │  4. Mark: success → mark_done, failure → mark_failed (attempts += 1)   │
//! │                                                                         │
//! │  Never touches bundle status, reserved_open or order lines.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use combo_core::{allocate, assess_health, compute_availability, BundleHealth};
use combo_db::{BundleSnapshot, Database, RecomputeRequest};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::runtime::ShutdownHandle;
use crate::single_flight::SingleFlight;

// =============================================================================
// Outcomes
// =============================================================================

/// What a recompute found for one bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    /// Snapshot refreshed.
    Refreshed { health: BundleHealth, snapshot: BundleSnapshot },
    /// Bundle is broken; health recorded, snapshot dropped.
    Broken { health: BundleHealth },
    /// Bundle no longer exists; caches cleared.
    Removed,
}

/// Summary of one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Requests handed out by the queue.
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Left pending because the bundle was already being recomputed.
    pub skipped: usize,
}

/// Recomputes the derived data of one bundle.
pub async fn recompute_bundle(db: &Database, bundle_id: &str, now: DateTime<Utc>) -> EngineResult<RecomputeOutcome> {
    let Some(definition) = db.bundles().get_by_id(bundle_id).await? else {
        db.cache().invalidate(bundle_id).await?;
        debug!(bundle_id = %bundle_id, "Bundle gone, caches cleared");
        return Ok(RecomputeOutcome::Removed);
    };

    let variant_ids = definition.variant_ids();
    let statuses = db.stock().component_statuses(&variant_ids).await?;
    let health = assess_health(&definition, &statuses, now);
    db.cache().put_health(&health, now).await?;

    if health.is_broken {
        db.cache().invalidate_snapshot(bundle_id).await?;
        warn!(
            bundle_id = %bundle_id,
            broken = health.broken_components.len(),
            "Bundle is broken"
        );
        return Ok(RecomputeOutcome::Broken { health });
    }

    let snapshots = db.stock().snapshots_for(&variant_ids).await?;
    let availability = compute_availability(&definition, &snapshots, definition.bundle_reserved_open, now)?;
    let allocation = allocate(&definition, 1)?;

    let snapshot = BundleSnapshot {
        bundle_id: bundle_id.to_string(),
        max_quantity: availability.max_quantity,
        availability_status: availability.status,
        total_pre_discount: allocation.total_pre_discount,
        total_bundle_price: allocation.total_bundle_price,
        computed_at: now,
    };
    db.cache().put_snapshot(&snapshot).await?;

    debug!(
        bundle_id = %bundle_id,
        max_quantity = snapshot.max_quantity,
        price = snapshot.total_bundle_price.cents(),
        "Bundle snapshot refreshed"
    );
    Ok(RecomputeOutcome::Refreshed { health, snapshot })
}

// =============================================================================
// Worker
// =============================================================================

/// Background worker for the recompute queue.
pub struct RecomputeWorker {
    db: Arc<Database>,
    config: Arc<EngineConfig>,
    flights: SingleFlight,
    shutdown_rx: mpsc::Receiver<()>,
}

impl RecomputeWorker {
    /// Creates a worker and the handle that stops it.
    pub fn new(db: Arc<Database>, config: Arc<EngineConfig>, flights: SingleFlight) -> (Self, ShutdownHandle) {
        let (handle, shutdown_rx) = ShutdownHandle::channel("recompute worker");
        (
            RecomputeWorker {
                db,
                config,
                flights,
                shutdown_rx,
            },
            handle,
        )
    }

    /// Runs the worker loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Recompute worker starting");

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut polls: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = process_batch(&self.db, &self.config, &self.flights).await {
                        error!(error = %e, "Failed to process recompute batch");
                    }

                    polls += 1;
                    // Roughly hourly at the default poll interval.
                    if polls % 720 == 0 {
                        match self.db.recompute_queue().cleanup_old_entries(self.config.worker.retention_days).await {
                            Ok(0) => {}
                            Ok(deleted) => debug!(deleted, "Cleaned up completed recompute requests"),
                            Err(e) => warn!(error = %e, "Recompute queue cleanup failed"),
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Recompute worker shutting down");
                    break;
                }
            }
        }

        info!("Recompute worker stopped");
    }
}

/// Processes one batch of pending requests.
///
/// Distinct bundles run concurrently; requests for a bundle that is
/// already being recomputed stay pending for the next poll.
pub async fn process_batch(
    db: &Arc<Database>,
    config: &EngineConfig,
    flights: &SingleFlight,
) -> EngineResult<BatchReport> {
    let requests = db
        .recompute_queue()
        .get_pending(config.worker.batch_size, config.worker.max_attempts)
        .await?;

    let mut report = BatchReport {
        requests: requests.len(),
        ..BatchReport::default()
    };
    if requests.is_empty() {
        return Ok(report);
    }

    info!(count = requests.len(), "Processing recompute batch");

    let mut by_bundle: BTreeMap<String, Vec<RecomputeRequest>> = BTreeMap::new();
    for request in requests {
        by_bundle.entry(request.bundle_id.clone()).or_default().push(request);
    }

    let mut tasks = JoinSet::new();
    for (bundle_id, requests) in by_bundle {
        let Some(guard) = flights.try_acquire(&bundle_id) else {
            debug!(bundle_id = %bundle_id, "Recompute already in flight, skipping");
            report.skipped += requests.len();
            continue;
        };

        let db = Arc::clone(db);
        tasks.spawn(async move {
            let _guard = guard;
            let result = recompute_bundle(&db, &bundle_id, Utc::now()).await;
            (bundle_id, requests, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (bundle_id, requests, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                // The requests stay pending and are retried next poll.
                error!(error = %EngineError::from(e), "Recompute task failed");
                report.failed += 1;
                continue;
            }
        };

        match result {
            Ok(_) => {
                for request in &requests {
                    db.recompute_queue().mark_done(&request.id).await?;
                }
                report.succeeded += requests.len();
            }
            Err(e) => {
                let message = e.to_string();
                if e.is_retryable() {
                    warn!(bundle_id = %bundle_id, error = %message, "Recompute failed, will retry");
                } else {
                    error!(bundle_id = %bundle_id, error = %message, "Recompute failed");
                }
                for request in &requests {
                    db.recompute_queue().mark_failed(&request.id, &message).await?;
                    if request.attempts + 1 >= i64::from(config.worker.max_attempts) {
                        warn!(
                            request_id = %request.id,
                            bundle_id = %bundle_id,
                            attempts = request.attempts + 1,
                            "Recompute request exceeded max attempts"
                        );
                    }
                }
                report.failed += requests.len();
            }
        }
    }

    debug!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "Recompute batch done"
    );
    Ok(report)
}
