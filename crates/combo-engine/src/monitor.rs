//! # Safety Monitor
//!
//! Periodic health pass over active bundles.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Monitor Pass                                    │
//! │                                                                         │
//! │  for each active bundle:                                                │
//! │    statuses = stock().component_statuses(variants)                      │
//! │    health   = assess_health(definition, statuses, now)                  │
//! │    previous = cache().get_health(id)       (none = first observation)   │
//! │    cache().put_health(health)                                           │
//! │    if changed: recompute_queue().enqueue(id, "health_changed")          │
//! │                                                                         │
//! │  Read-only towards bundles: status, reserved_open and prices are        │
//! │  never written here.                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use combo_core::{assess_health, BundleDefinition};
use combo_db::Database;

use crate::error::EngineResult;
use crate::runtime::ShutdownHandle;

/// Reason recorded on recompute requests raised by the monitor.
pub const HEALTH_CHANGED: &str = "health_changed";

/// Summary of one monitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub checked: usize,
    /// Health differs from the last observation.
    pub changed: usize,
    pub broken: usize,
    pub expired: usize,
    pub enqueued: usize,
    pub failed: usize,
}

/// Runs one health pass over every active bundle.
///
/// A failure on one bundle is logged and counted; the pass continues.
pub async fn run_monitor_pass(db: &Database, now: DateTime<Utc>) -> EngineResult<MonitorReport> {
    let bundles = db.bundles().list_active().await?;
    let mut report = MonitorReport::default();

    for definition in &bundles {
        report.checked += 1;
        match check_bundle(db, definition, now).await {
            Ok(observed) => {
                if observed.broken {
                    report.broken += 1;
                }
                if observed.expired {
                    report.expired += 1;
                }
                if observed.changed {
                    report.changed += 1;
                    report.enqueued += 1;
                }
            }
            Err(e) => {
                error!(bundle_id = %definition.id, error = %e, "Health check failed");
                report.failed += 1;
            }
        }
    }

    info!(
        checked = report.checked,
        changed = report.changed,
        broken = report.broken,
        expired = report.expired,
        failed = report.failed,
        "Safety monitor pass complete"
    );
    Ok(report)
}

struct Observed {
    changed: bool,
    broken: bool,
    expired: bool,
}

async fn check_bundle(db: &Database, definition: &BundleDefinition, now: DateTime<Utc>) -> EngineResult<Observed> {
    let statuses = db.stock().component_statuses(&definition.variant_ids()).await?;
    let health = assess_health(definition, &statuses, now);

    let changed = match db.cache().get_health(&definition.id).await? {
        Some(previous) => health.differs_from(&previous),
        None => true,
    };

    db.cache().put_health(&health, now).await?;

    if changed {
        if health.is_broken {
            warn!(
                bundle_id = %definition.id,
                broken = ?health.broken_components,
                "Bundle health changed: broken"
            );
        } else {
            debug!(
                bundle_id = %definition.id,
                available = health.is_available,
                expired = health.is_expired,
                "Bundle health changed"
            );
        }
        db.recompute_queue().enqueue(&definition.id, HEALTH_CHANGED).await?;
    }

    Ok(Observed {
        changed,
        broken: health.is_broken,
        expired: health.is_expired,
    })
}

// =============================================================================
// Background Loop
// =============================================================================

/// Background loop running [`run_monitor_pass`] on an interval.
pub struct SafetyMonitor {
    db: Arc<Database>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SafetyMonitor {
    pub fn new(db: Arc<Database>, interval: Duration) -> (Self, ShutdownHandle) {
        let (handle, shutdown_rx) = ShutdownHandle::channel("safety monitor");
        (
            SafetyMonitor {
                db,
                interval,
                shutdown_rx,
            },
            handle,
        )
    }

    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Safety monitor starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run_monitor_pass(&self.db, Utc::now()).await {
                        error!(error = %e, "Safety monitor pass failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Safety monitor shutting down");
                    break;
                }
            }
        }

        info!("Safety monitor stopped");
    }
}
