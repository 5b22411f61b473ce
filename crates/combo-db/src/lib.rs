//! # combo-db: Storage Layer for Combo Bundles
//!
//! SQLite storage for bundle definitions and the collaborators the bundle
//! logic reads from: stock, orders, promotion policy.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Combo Bundles Data Flow                          │
//! │                                                                         │
//! │  BundleService / background loops (combo-engine)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     combo-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ BundleRepo     │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ StockRepo      │    │ 001_init.sql │  │   │
//! │  │   │ WAL, FKs on   │    │ OrderRepo      │    │              │  │   │
//! │  │   │               │    │ Reservation... │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                               │                                 │   │
//! │  │                               ▼                                 │   │
//! │  │                    combo-core (pure pricing,                    │   │
//! │  │                    availability, ledger math)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use combo_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("combo.db")).await?;
//!
//! let order = db.orders().create_order().await?;
//! let added = db.orders().add_bundle_lines(&order, "weekend-kit", 2, Utc::now()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::bundle::BundleRepository;
pub use repository::cache::{BundleSnapshot, CacheRepository};
pub use repository::order::{BundleLinesAdded, OrderBundleRef, OrderRepository};
pub use repository::policy::PolicyRepository;
pub use repository::recompute::{RecomputeQueueRepository, RecomputeRequest};
pub use repository::reservation::{ReconcileOutcome, ReservationRepository};
pub use repository::stock::StockRepository;
