//! # Repository Module
//!
//! Database repository implementations for combo bundles.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  BundleService (combo-engine)                                          │
//! │       │                                                                 │
//! │       │  db.orders().add_bundle_lines(order, bundle, 2, now)           │
//! │       ▼                                                                 │
//! │  OrderRepository ──uses──► bundle::fetch_definition                    │
//! │                   ──uses──► stock::fetch_snapshots                     │
//! │                   ──uses──► combo_core::{compute_availability, allocate}│
//! │       │                                                                 │
//! │       │  one transaction                                                │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Connection-level helpers take `&mut SqliteConnection`, so the same   │
//! │  read works on a pooled connection and inside a transaction.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`BundleRepository`](bundle::BundleRepository) - Bundle definitions and components
//! - [`StockRepository`](stock::StockRepository) - Stock store collaborator
//! - [`OrderRepository`](order::OrderRepository) - Orders, bundle lines, add-to-order boundary
//! - [`ReservationRepository`](reservation::ReservationRepository) - Atomic reservation counter
//! - [`PolicyRepository`](policy::PolicyRepository) - Promotion policy document
//! - [`RecomputeQueueRepository`](recompute::RecomputeQueueRepository) - Recompute requests
//! - [`CacheRepository`](cache::CacheRepository) - Health and snapshot caches

pub mod bundle;
pub mod cache;
pub mod order;
pub mod policy;
pub mod recompute;
pub mod reservation;
pub mod stock;
