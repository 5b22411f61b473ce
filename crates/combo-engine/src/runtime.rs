//! # Engine Runtime
//!
//! Starts the background loops and stops them again.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         EngineRuntime::start                            │
//! │                                                                         │
//! │   ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐ │
//! │   │ RecomputeWorker  │  │  SafetyMonitor   │  │  LedgerReconciler    │ │
//! │   │ always           │  │ monitor.enabled  │  │ interval > 0         │ │
//! │   └────────┬─────────┘  └────────┬─────────┘  └──────────┬───────────┘ │
//! │            └─────────────────────┼───────────────────────┘             │
//! │                                  ▼                                      │
//! │                            EngineHandle                                 │
//! │     shutdown(): signal every loop, then await every JoinHandle          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Build the request-path [`BundleService`] with [`EngineRuntime::service`]
//! so manual reconciles share the reconciler's in-flight set.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use combo_db::Database;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerReconciler, ReservationLedger};
use crate::monitor::SafetyMonitor;
use crate::recompute::RecomputeWorker;
use crate::service::BundleService;
use crate::single_flight::SingleFlight;

// =============================================================================
// Shutdown Handle
// =============================================================================

/// Stops one background loop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Creates a handle and the receiver its loop selects on.
    pub fn channel(name: &'static str) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (ShutdownHandle { name, shutdown_tx }, shutdown_rx)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the loop to stop.
    ///
    /// Fails with `ChannelError` if the loop is already gone.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError(format!("{} already stopped", self.name)))
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Owns what the background loops share.
pub struct EngineRuntime {
    config: Arc<EngineConfig>,
    db: Arc<Database>,
    flights: SingleFlight,
    ledger: ReservationLedger,
}

struct RunningTask {
    handle: ShutdownHandle,
    join: JoinHandle<()>,
}

/// Controls a started runtime.
pub struct EngineHandle {
    tasks: Vec<RunningTask>,
}

impl EngineRuntime {
    pub fn new(config: EngineConfig, db: Arc<Database>) -> Self {
        EngineRuntime {
            config: Arc::new(config),
            ledger: ReservationLedger::new(db.clone()),
            db,
            flights: SingleFlight::new(),
        }
    }

    /// Service facade sharing this runtime's reservation ledger.
    pub fn service(&self) -> BundleService {
        BundleService::with_ledger(self.db.clone(), self.ledger.clone())
    }

    /// Spawns the enabled loops. Must be called inside a tokio runtime.
    pub fn start(self) -> EngineHandle {
        let mut tasks = Vec::new();

        let (worker, handle) = RecomputeWorker::new(self.db.clone(), self.config.clone(), self.flights.clone());
        tasks.push(RunningTask {
            handle,
            join: tokio::spawn(worker.run()),
        });

        if self.config.monitor.enabled {
            let (monitor, handle) = SafetyMonitor::new(self.db.clone(), self.config.monitor_interval());
            tasks.push(RunningTask {
                handle,
                join: tokio::spawn(monitor.run()),
            });
        } else {
            info!("Safety monitor disabled");
        }

        match self.config.reconcile_interval() {
            Some(interval) => {
                let (reconciler, handle) = LedgerReconciler::new(self.ledger.clone(), interval);
                tasks.push(RunningTask {
                    handle,
                    join: tokio::spawn(reconciler.run()),
                });
            }
            None => info!("Periodic ledger reconciliation disabled"),
        }

        info!(
            instance = %self.config.instance.name,
            tasks = tasks.len(),
            "Engine runtime started"
        );
        EngineHandle { tasks }
    }
}

impl EngineHandle {
    /// Names of the running loops, in start order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.handle.name()).collect()
    }

    /// Stops every loop and waits for it to finish.
    ///
    /// All loops are awaited even if one fails; the first failure is returned.
    pub async fn shutdown(self) -> EngineResult<()> {
        info!("Shutting down engine runtime");

        for task in &self.tasks {
            if let Err(e) = task.handle.shutdown().await {
                warn!(task = task.handle.name(), error = %e, "Shutdown signal not delivered");
            }
        }

        let mut first_error = None;
        for task in self.tasks {
            let name = task.handle.name();
            if let Err(e) = task.join.await {
                error!(task = name, error = %e, "Background task ended abnormally");
                first_error.get_or_insert(EngineError::from(e));
            }
        }

        info!("Engine runtime stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Process Signals
// =============================================================================

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::engine_db;

    #[tokio::test]
    async fn test_shutdown_handle_reports_closed_loop() {
        let (handle, rx) = ShutdownHandle::channel("test loop");
        assert_eq!(handle.name(), "test loop");
        drop(rx);
        assert!(matches!(handle.shutdown().await, Err(EngineError::ChannelError(_))));
    }

    #[tokio::test]
    async fn test_start_respects_config() {
        let db = engine_db().await;
        let mut config = EngineConfig::default();
        config.monitor.enabled = false;
        config.ledger.reconcile_interval_secs = 0;

        let handle = EngineRuntime::new(config, db).start();
        assert_eq!(handle.task_names(), vec!["recompute worker"]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_service_shares_reconciler_flights() {
        let db = engine_db().await;
        db.bundles().insert(&crate::test_support::bundle("b-1", &[("tent", 1, 2000)])).await.unwrap();
        let runtime = EngineRuntime::new(EngineConfig::default(), db);
        let service = runtime.service();

        let _held = runtime.ledger.flights.try_acquire("b-1").unwrap();
        assert!(service.ledger().is_reconciling("b-1"));
        assert_eq!(service.ledger().reconcile("b-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_all_loops_start_and_stop() {
        let db = engine_db().await;
        let handle = EngineRuntime::new(EngineConfig::default(), db).start();
        assert_eq!(
            handle.task_names(),
            vec!["recompute worker", "safety monitor", "ledger reconciler"]
        );
        handle.shutdown().await.unwrap();
    }
}
