//! # combo-core: Pure Bundle Logic
//!
//! Pricing, availability, reservation accounting, promotion guarding and
//! health assessment for composite offers ("bundles"), as pure functions
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Combo Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host order system / admin UI                    │   │
//! │  │   add bundle ──► checkout ──► line pricing ──► state changes   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          combo-engine (service, workers, runtime)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ combo-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌──────────┐  ┌──────────┐  │   │
//! │  │   │  pricing  │  │availability │  │  ledger  │  │  guard   │  │   │
//! │  │   │ allocate  │  │ 4 gates     │  │ deltas   │  │ policy   │  │   │
//! │  │   └───────────┘  └─────────────┘  └──────────┘  └──────────┘  │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌──────────┐  ┌──────────┐  │   │
//! │  │   │  health   │  │ validation  │  │  money   │  │  types   │  │   │
//! │  │   └───────────┘  └─────────────┘  └──────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                combo-db (SQLite storage)                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Bundle definitions, components, stock, line metadata
//! - [`money`] - Integer cents and the single rounding rule
//! - [`pricing`] - Discount allocation with drift correction
//! - [`availability`] - Schedule, stock and capacity gates
//! - [`ledger`] - Reservation counter rules
//! - [`guard`] - Promotion stacking policy
//! - [`health`] - Broken/expired assessment
//! - [`validation`] - Definition checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use combo_core::money::Money;
//! use combo_core::pricing::allocate_components;
//! use combo_core::types::{Component, DiscountConfig};
//!
//! let component = |id: &str, cents: i64| Component {
//!     variant_id: id.to_string(),
//!     name: id.to_string(),
//!     quantity_per_bundle: 1,
//!     weight: None,
//!     unit_price_snapshot: Money::from_cents(cents),
//! };
//! let components = vec![component("a", 333), component("b", 333), component("c", 334)];
//!
//! let result = allocate_components(
//!     "bundle-1",
//!     &components,
//!     1,
//!     DiscountConfig::Fixed(Money::from_cents(900)),
//! )
//! .unwrap();
//!
//! // The missing cent lands on the largest component.
//! assert_eq!(result.total_adjustment().cents(), -100);
//! assert_eq!(result.drift_component, Some(2));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod availability;
pub mod error;
pub mod guard;
pub mod health;
pub mod ledger;
pub mod money;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use availability::{compute_availability, compute_sellable, AvailabilityResult, AvailabilityStatus};
pub use error::{CoreError, CoreResult, ValidationError};
pub use guard::{evaluate_promotion_guard, GuardResult, PromotionCandidate, PromotionGuard, PromotionPolicy};
pub use health::{assess_health, BundleHealth};
pub use ledger::{OpenOrderRef, OrderTransition};
pub use money::Money;
pub use pricing::{allocate, AllocationResult};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum bundles in one add-to-order request.
pub const MAX_BUNDLE_QUANTITY: i64 = 999;

/// Maximum components in one bundle.
pub const MAX_COMPONENTS: usize = 50;

/// Maximum units of one component per bundle.
pub const MAX_COMPONENT_QUANTITY: i64 = 999;
