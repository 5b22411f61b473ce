//! # combo-engine: Service Facade and Background Loops
//!
//! The layer the host order system talks to, plus the loops that keep
//! derived bundle data honest.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         combo-engine                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   BundleService (request path)                   │  │
//! │  │  create / activate, quote, availability, add to order,           │  │
//! │  │  checkout re-check, promotion guard, order transitions           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ enqueue / adjust                        │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │RecomputeWorker │  │ SafetyMonitor  │  │  LedgerReconciler      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Drains queue,  │  │ Health pass,   │  │ Rebuilds reserved_open │    │
//! │  │ refreshes      │  │ enqueues on    │  │ from open orders       │    │
//! │  │ snapshots      │  │ change         │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  All three loops are single-flight per bundle id and stopped through    │
//! │  the EngineHandle returned by EngineRuntime::start.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Engine configuration (TOML file + environment)
//! - [`error`] - Engine error types
//! - [`service`] - `BundleService`, the request-path facade
//! - [`ledger`] - Reservation ledger and its periodic reconciler
//! - [`recompute`] - Recompute queue worker
//! - [`monitor`] - Safety monitor
//! - [`runtime`] - Starting and stopping the loops
//! - [`single_flight`] - Per-key in-flight guard

pub mod config;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod recompute;
pub mod runtime;
pub mod service;
pub mod single_flight;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use ledger::{LedgerReconciler, LedgerReport, ReservationLedger};
pub use monitor::{run_monitor_pass, MonitorReport, SafetyMonitor};
pub use recompute::{process_batch, recompute_bundle, BatchReport, RecomputeOutcome, RecomputeWorker};
pub use runtime::{shutdown_signal, EngineHandle, EngineRuntime, ShutdownHandle};
pub use service::BundleService;
pub use single_flight::{FlightGuard, SingleFlight};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::Utc;
    use combo_core::{BundleDefinition, BundleStatus, Component, DiscountMode, Money, Percent};
    use combo_db::{Database, DbConfig};

    /// Fresh migrated in-memory database.
    pub async fn engine_db() -> Arc<Database> {
        Arc::new(Database::new(DbConfig::in_memory()).await.unwrap())
    }

    /// Active bundle at 10% off with `(variant, qty, price_cents)` components.
    pub fn bundle(id: &str, components: &[(&str, i64, i64)]) -> BundleDefinition {
        let now = Utc::now();
        BundleDefinition {
            id: id.to_string(),
            name: format!("Bundle {}", id),
            status: BundleStatus::Active,
            discount_mode: DiscountMode::Percent,
            fixed_price_cents: None,
            percent_off: Some(Percent::from_bps(1000)),
            valid_from: None,
            valid_to: None,
            bundle_cap: None,
            bundle_reserved_open: 0,
            components: components
                .iter()
                .map(|(variant, qty, price)| Component {
                    variant_id: variant.to_string(),
                    name: variant.to_string(),
                    quantity_per_bundle: *qty,
                    weight: None,
                    unit_price_snapshot: Money::from_cents(*price),
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }
}
