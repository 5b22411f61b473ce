//! # Domain Types
//!
//! Core domain types shared by every bundle computation.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐     ┌─────────────────────┐                   │
//! │  │  BundleDefinition   │ 1─n │     Component       │                   │
//! │  │  ─────────────────  │─────│  ─────────────────  │                   │
//! │  │  id, status         │     │  variant_id         │                   │
//! │  │  discount_mode      │     │  quantity_per_bundle│                   │
//! │  │  fixed / percent    │     │  weight             │                   │
//! │  │  valid_from/to      │     │  unit_price_snapshot│                   │
//! │  │  bundle_cap         │     └─────────────────────┘                   │
//! │  │  reserved_open      │                                                │
//! │  └─────────────────────┘                                                │
//! │                                                                         │
//! │  ┌─────────────────────┐     ┌─────────────────────┐                   │
//! │  │  StockSnapshot      │     │ BundleLineMetadata  │                   │
//! │  │  on_hand, allocated │     │ bundle_key, header  │                   │
//! │  └─────────────────────┘     │ adj, pct, share     │                   │
//! │                              └─────────────────────┘                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Persisted vs Computed State
//! Only `Draft` and `Active` are stored. Expiry and brokenness are computed
//! at read time (see [`crate::health`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreResult;
use crate::money::Money;
use crate::validation::validate_discount_fields;

// =============================================================================
// Percent
// =============================================================================

/// A percentage in basis points (bps).
///
/// 1 basis point = 0.01%, so `percentOff = 10` is `Percent::from_bps(1000)`.
/// Money math only ever sees the integer bps value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Percent(u32);

impl Percent {
    /// 100% in basis points.
    pub const MAX_BPS: u32 = 10_000;

    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Percent(bps)
    }

    /// Creates a percentage from a whole number (10 = 10%).
    #[inline]
    pub const fn from_whole(pct: u32) -> Self {
        Percent(pct * 100)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for reporting only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Percent(0)
    }

    #[inline]
    pub const fn full() -> Self {
        Percent(Self::MAX_BPS)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Percent {
    fn default() -> Self {
        Percent::zero()
    }
}

// =============================================================================
// Bundle Status & Discount Mode
// =============================================================================

/// Persisted lifecycle state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    /// Being configured; never sellable.
    Draft,
    /// Validated and sellable (subject to schedule, stock and capacity).
    Active,
}

impl Default for BundleStatus {
    fn default() -> Self {
        BundleStatus::Draft
    }
}

impl std::fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleStatus::Draft => write!(f, "draft"),
            BundleStatus::Active => write!(f, "active"),
        }
    }
}

/// How the bundle discount is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountMode {
    /// The whole bundle sells for `fixed_price_cents`.
    Fixed,
    /// Every component is reduced by `percent_off`.
    Percent,
}

/// The validated, typed form of a bundle's discount fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountConfig {
    /// Fixed bundle price per bundle.
    Fixed(Money),
    /// Percentage off every component.
    Percent(Percent),
}

// =============================================================================
// Component
// =============================================================================

/// One stocked item and its required quantity within a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Component {
    /// Stock-tracked item this component refers to.
    pub variant_id: String,

    /// Display name at time of configuration.
    pub name: String,

    /// Units of the variant in one bundle.
    pub quantity_per_bundle: i64,

    /// Proration weight for fixed-price bundles. `None` means 1.
    pub weight: Option<u32>,

    /// Tax-inclusive unit price captured for allocation and audit.
    pub unit_price_snapshot: Money,
}

impl Component {
    /// Returns the proration weight, defaulting to 1.
    #[inline]
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}

// =============================================================================
// Bundle Definition
// =============================================================================

/// Where `now` falls relative to a bundle's schedule window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePosition {
    NotYetValid,
    Within,
    Expired,
}

/// A composite offer made of several independently stocked components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BundleDefinition {
    pub id: String,
    pub name: String,
    pub status: BundleStatus,
    pub discount_mode: DiscountMode,

    /// Price of one whole bundle. Set only in `Fixed` mode.
    pub fixed_price_cents: Option<i64>,

    /// Percentage off each component. Set only in `Percent` mode.
    pub percent_off: Option<Percent>,

    /// Inclusive lower bound of the sale window. `None` = unbounded.
    #[ts(as = "Option<String>")]
    pub valid_from: Option<DateTime<Utc>>,

    /// Inclusive upper bound of the sale window. `None` = unbounded.
    #[ts(as = "Option<String>")]
    pub valid_to: Option<DateTime<Utc>>,

    /// Marketing capacity. `None` = unlimited.
    pub bundle_cap: Option<i64>,

    /// Bundles paid for but not yet fulfilled (maintained by the ledger).
    pub bundle_reserved_open: i64,

    /// Ordered components. Order matters for drift tie-breaking.
    pub components: Vec<Component>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl BundleDefinition {
    /// Returns the typed discount configuration.
    ///
    /// ## Errors
    /// `Configuration` when both or neither companion fields are set, or the
    /// field that is set does not match `discount_mode`.
    pub fn discount(&self) -> CoreResult<DiscountConfig> {
        let config = validate_discount_fields(
            self.discount_mode,
            self.fixed_price_cents,
            self.percent_off,
        )?;
        Ok(config)
    }

    /// Locates `now` relative to the (inclusive) schedule window.
    pub fn schedule_position(&self, now: DateTime<Utc>) -> SchedulePosition {
        if let Some(from) = self.valid_from {
            if now < from {
                return SchedulePosition::NotYetValid;
            }
        }
        if let Some(to) = self.valid_to {
            if now > to {
                return SchedulePosition::Expired;
            }
        }
        SchedulePosition::Within
    }

    #[inline]
    pub fn is_within_schedule(&self, now: DateTime<Utc>) -> bool {
        self.schedule_position(now) == SchedulePosition::Within
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == BundleStatus::Active
    }

    /// Returns `bundle_reserved_open > bundle_cap` (always false when uncapped).
    pub fn is_overbooked(&self) -> bool {
        matches!(self.bundle_cap, Some(cap) if self.bundle_reserved_open > cap)
    }

    /// Variant ids of all components, in order.
    pub fn variant_ids(&self) -> Vec<String> {
        self.components.iter().map(|c| c.variant_id.clone()).collect()
    }
}

// =============================================================================
// Stock
// =============================================================================

/// Stock levels of one component variant, as read from the stock store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockSnapshot {
    pub on_hand: i64,
    /// Already promised to other orders.
    pub allocated: i64,
}

impl StockSnapshot {
    pub fn new(on_hand: i64, allocated: i64) -> Self {
        StockSnapshot { on_hand, allocated }
    }

    /// `max(0, on_hand − allocated)`.
    #[inline]
    pub fn effective_available(&self) -> i64 {
        (self.on_hand - self.allocated).max(0)
    }
}

/// State of a referenced stock item as seen by the stock store.
///
/// A variant absent from the store altogether is "missing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Active,
    Disabled,
    Deleted,
}

impl Default for ComponentStatus {
    fn default() -> Self {
        ComponentStatus::Active
    }
}

// =============================================================================
// Order Line Metadata
// =============================================================================

/// Bundle metadata attached to an order line at purchase time.
///
/// ## Invariant
/// For one `bundle_key`, the sum of `bundle_adj_amount` over non-header
/// lines equals exactly the negated total discount of the allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BundleLineMetadata {
    /// Groups all lines of one bundle purchase.
    pub bundle_key: String,

    pub bundle_id: String,

    /// Component variant; `None` on the header line.
    pub variant_id: Option<String>,

    /// Cosmetic display line; never priced or discounted further.
    pub is_bundle_header: bool,

    /// Total units on this line (bundles for the header line).
    pub quantity: i64,

    pub base_unit_price: Money,
    pub effective_unit_price: Money,

    /// Signed line adjustment, always ≤ 0.
    pub bundle_adj_amount: Money,

    /// Percentage of the line subtotal removed by the bundle (0-100).
    pub bundle_pct_applied: f64,

    /// Fraction of the pre-discount bundle total this line represents.
    pub bundle_share: f64,
}

// =============================================================================
// Order State
// =============================================================================

/// Host order lifecycle states relevant to reservation accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    AddingItems,
    ArrangingPayment,
    PaymentAuthorized,
    PaymentSettled,
    PartiallyShipped,
    Shipped,
    PartiallyDelivered,
    Delivered,
    Cancelled,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderState; 9] = [
        OrderState::AddingItems,
        OrderState::ArrangingPayment,
        OrderState::PaymentAuthorized,
        OrderState::PaymentSettled,
        OrderState::PartiallyShipped,
        OrderState::Shipped,
        OrderState::PartiallyDelivered,
        OrderState::Delivered,
        OrderState::Cancelled,
    ];

    /// Paid but not yet fulfilled: counts against bundle capacity.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderState::PaymentAuthorized
                | OrderState::PaymentSettled
                | OrderState::PartiallyShipped
                | OrderState::Shipped
                | OrderState::PartiallyDelivered
        )
    }

    /// Fulfilled or cancelled.
    pub fn is_closed(&self) -> bool {
        matches!(self, OrderState::Delivered | OrderState::Cancelled)
    }

    /// Stable storage name (matches the serde and sqlx representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::AddingItems => "adding_items",
            OrderState::ArrangingPayment => "arranging_payment",
            OrderState::PaymentAuthorized => "payment_authorized",
            OrderState::PaymentSettled => "payment_settled",
            OrderState::PartiallyShipped => "partially_shipped",
            OrderState::Shipped => "shipped",
            OrderState::PartiallyDelivered => "partially_delivered",
            OrderState::Delivered => "delivered",
            OrderState::Cancelled => "cancelled",
        }
    }
}

impl Default for OrderState {
    fn default() -> Self {
        OrderState::AddingItems
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
