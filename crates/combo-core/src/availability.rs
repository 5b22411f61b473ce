//! # Availability Calculator
//!
//! Combines schedule, stock and capacity gates into one sellable quantity.
//!
//! ## Gate Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. Schedule / status ── not Active or outside window ──► 0 (stop)      │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  2. Components      A_components = min_i ⌊available_i / qty_i⌋          │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  3. Capacity        A_shell = cap − reserved_open  (∞ when uncapped)    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  4. Final           A_final = min(A_components, A_shell)                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Running out of stock is a result, not an error. The only errors are
//! invalid input: no components, or a component with no stock snapshot.
//!
//! Callers selling a bundle go through [`compute_sellable`], which also
//! refuses bundles with a disabled component.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::health::{assess_health, BrokenReason};
use crate::types::{BundleDefinition, ComponentStatus, SchedulePosition, StockSnapshot};

// =============================================================================
// Result Types
// =============================================================================

/// Why a bundle is (or is not) sellable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    /// Bundle is not active.
    Draft,
    /// Before `valid_from`.
    NotYetValid,
    /// After `valid_to`.
    Expired,
    /// At least one component cannot cover a single bundle.
    OutOfStock,
    /// Marketing capacity is used up.
    CapacityExhausted,
    /// A component is disabled in the stock store.
    Broken,
}

/// A component that cannot cover even one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InsufficientItem {
    pub variant_id: String,
    /// Units needed for one bundle.
    pub required: i64,
    pub available: i64,
    pub shortfall: i64,
}

/// Outcome of an availability computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AvailabilityResult {
    pub bundle_id: String,
    pub is_available: bool,

    /// `A_final`.
    pub max_quantity: i64,

    pub status: AvailabilityStatus,

    /// `"draft"` or `"scheduled"` when the schedule gate fails, `"broken"`
    /// when a component is disabled.
    pub reason: Option<String>,

    pub insufficient_items: Vec<InsufficientItem>,

    /// `A_components`; 0 when the schedule gate stopped evaluation.
    pub components_max: i64,

    /// `A_shell`; `None` means unlimited.
    pub shell_max: Option<i64>,

    /// `bundle_reserved_open > bundle_cap`.
    pub overbooked: bool,
}

impl AvailabilityResult {
    /// Returns true if `qty` bundles can be sold right now.
    pub fn allows(&self, qty: i64) -> bool {
        qty > 0 && qty <= self.max_quantity
    }

    /// Like [`allows`](Self::allows), but as a typed error for callers that
    /// must hard-stop.
    pub fn ensure(&self, qty: i64) -> CoreResult<()> {
        if self.allows(qty) {
            Ok(())
        } else {
            Err(CoreError::InsufficientAvailability {
                bundle_id: self.bundle_id.clone(),
                requested: qty,
                available: self.max_quantity,
            })
        }
    }

    fn blocked(bundle_id: &str, status: AvailabilityStatus, reason: &str) -> Self {
        AvailabilityResult {
            bundle_id: bundle_id.to_string(),
            is_available: false,
            max_quantity: 0,
            status,
            reason: Some(reason.to_string()),
            insufficient_items: Vec::new(),
            components_max: 0,
            shell_max: None,
            overbooked: false,
        }
    }
}

// =============================================================================
// Computation
// =============================================================================

/// Computes how many bundles can be sold at `now`.
///
/// ## Arguments
/// * `definition` - the bundle (its own `bundle_reserved_open` is ignored)
/// * `stock` - snapshot per component `variant_id`
/// * `bundle_reserved_open` - current reservation counter
/// * `now` - evaluation instant for the schedule gate
///
/// ## Errors
/// - `Configuration` if the bundle has no components
/// - `Integrity` if a component has no stock snapshot
pub fn compute_availability(
    definition: &BundleDefinition,
    stock: &HashMap<String, StockSnapshot>,
    bundle_reserved_open: i64,
    now: DateTime<Utc>,
) -> CoreResult<AvailabilityResult> {
    // Gate 1: schedule / status
    if !definition.is_active() {
        return Ok(AvailabilityResult::blocked(
            &definition.id,
            AvailabilityStatus::Draft,
            "draft",
        ));
    }
    match definition.schedule_position(now) {
        SchedulePosition::Within => {}
        SchedulePosition::NotYetValid => {
            return Ok(AvailabilityResult::blocked(
                &definition.id,
                AvailabilityStatus::NotYetValid,
                "scheduled",
            ));
        }
        SchedulePosition::Expired => {
            return Ok(AvailabilityResult::blocked(
                &definition.id,
                AvailabilityStatus::Expired,
                "scheduled",
            ));
        }
    }

    // Gate 2: components
    if definition.components.is_empty() {
        return Err(ValidationError::Required {
            field: "components".to_string(),
        }
        .into());
    }

    let mut components_max = i64::MAX;
    let mut insufficient_items = Vec::new();
    for component in &definition.components {
        if component.quantity_per_bundle <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity_per_bundle".to_string(),
            }
            .into());
        }

        let snapshot = stock.get(&component.variant_id).ok_or_else(|| {
            CoreError::integrity(&definition.id, &component.variant_id, "no stock snapshot")
        })?;
        let available = snapshot.effective_available();

        components_max = components_max.min(available / component.quantity_per_bundle);

        if available < component.quantity_per_bundle {
            insufficient_items.push(InsufficientItem {
                variant_id: component.variant_id.clone(),
                required: component.quantity_per_bundle,
                available,
                shortfall: component.quantity_per_bundle - available,
            });
        }
    }

    // Gate 3: capacity
    let reserved = bundle_reserved_open.max(0);
    let shell_max = definition.bundle_cap.map(|cap| (cap - reserved).max(0));
    let overbooked = matches!(definition.bundle_cap, Some(cap) if reserved > cap);
    if overbooked {
        warn!(
            bundle_id = %definition.id,
            reserved_open = reserved,
            cap = ?definition.bundle_cap,
            "Bundle is overbooked"
        );
    }

    // Gate 4: final
    let max_quantity = match shell_max {
        Some(shell) => components_max.min(shell),
        None => components_max,
    };

    let status = if max_quantity > 0 {
        AvailabilityStatus::Available
    } else if components_max == 0 {
        AvailabilityStatus::OutOfStock
    } else {
        AvailabilityStatus::CapacityExhausted
    };

    Ok(AvailabilityResult {
        bundle_id: definition.id.clone(),
        is_available: max_quantity > 0,
        max_quantity,
        status,
        reason: None,
        insufficient_items,
        components_max,
        shell_max,
        overbooked,
    })
}

/// [`compute_availability`] for a bundle about to be sold.
///
/// An active bundle within its window whose components include a disabled
/// variant is blocked with reason `"broken"`. Missing or deleted variants
/// fall through to the snapshot check and surface as `Integrity`.
pub fn compute_sellable(
    definition: &BundleDefinition,
    stock: &HashMap<String, StockSnapshot>,
    statuses: &HashMap<String, ComponentStatus>,
    bundle_reserved_open: i64,
    now: DateTime<Utc>,
) -> CoreResult<AvailabilityResult> {
    let health = assess_health(definition, statuses, now);
    let only_disabled = health
        .broken_components
        .iter()
        .all(|c| c.reason == BrokenReason::Disabled);

    if health.is_broken && only_disabled && definition.is_active() && health.within_schedule {
        warn!(
            bundle_id = %definition.id,
            broken = ?health.broken_components,
            "Refusing to sell broken bundle"
        );
        return Ok(AvailabilityResult::blocked(
            &definition.id,
            AvailabilityStatus::Broken,
            "broken",
        ));
    }

    compute_availability(definition, stock, bundle_reserved_open, now)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::{BundleStatus, Component, DiscountMode, Percent};
    use chrono::Duration;
    use proptest::prelude::*;

    fn component(variant: &str, qty: i64) -> Component {
        Component {
            variant_id: variant.to_string(),
            name: variant.to_string(),
            quantity_per_bundle: qty,
            weight: None,
            unit_price_snapshot: Money::from_cents(1000),
        }
    }

    fn definition(cap: Option<i64>) -> BundleDefinition {
        let now = Utc::now();
        BundleDefinition {
            id: "b-1".to_string(),
            name: "Desk Set".to_string(),
            status: BundleStatus::Active,
            discount_mode: DiscountMode::Percent,
            fixed_price_cents: None,
            percent_off: Some(Percent::from_whole(10)),
            valid_from: None,
            valid_to: None,
            bundle_cap: cap,
            bundle_reserved_open: 0,
            components: vec![component("lamp", 1), component("pen", 2)],
            created_at: now,
            updated_at: now,
        }
    }

    fn stock(pairs: &[(&str, i64, i64)]) -> HashMap<String, StockSnapshot> {
        pairs
            .iter()
            .map(|(id, on_hand, allocated)| (id.to_string(), StockSnapshot::new(*on_hand, *allocated)))
            .collect()
    }

    #[test]
    fn test_capacity_gate() {
        let def = definition(Some(50));
        let snapshots = stock(&[("lamp", 100, 0), ("pen", 200, 0)]);
        let result = compute_availability(&def, &snapshots, 45, Utc::now()).unwrap();

        assert_eq!(result.components_max, 100);
        assert_eq!(result.shell_max, Some(5));
        assert_eq!(result.max_quantity, 5);
        assert!(result.is_available);
        assert!(result.allows(5));
        assert!(!result.allows(6));
    }

    #[test]
    fn test_schedule_gate_ignores_stock() {
        let mut def = definition(None);
        def.status = BundleStatus::Draft;
        let result = compute_availability(&def, &HashMap::new(), 0, Utc::now()).unwrap();
        assert!(!result.is_available);
        assert_eq!(result.max_quantity, 0);
        assert_eq!(result.status, AvailabilityStatus::Draft);
        assert_eq!(result.reason.as_deref(), Some("draft"));

        let mut def = definition(None);
        let now = Utc::now();
        def.valid_to = Some(now - Duration::hours(1));
        let plenty = stock(&[("lamp", 1000, 0), ("pen", 1000, 0)]);
        let result = compute_availability(&def, &plenty, 0, now).unwrap();
        assert_eq!(result.status, AvailabilityStatus::Expired);
        assert_eq!(result.reason.as_deref(), Some("scheduled"));
        assert_eq!(result.max_quantity, 0);
    }

    #[test]
    fn test_component_gate_floor_and_insufficient() {
        let def = definition(None);
        let snapshots = stock(&[("lamp", 10, 3), ("pen", 1, 0)]);
        let result = compute_availability(&def, &snapshots, 0, Utc::now()).unwrap();

        assert_eq!(result.max_quantity, 0);
        assert_eq!(result.status, AvailabilityStatus::OutOfStock);
        assert_eq!(
            result.insufficient_items,
            vec![InsufficientItem {
                variant_id: "pen".to_string(),
                required: 2,
                available: 1,
                shortfall: 1,
            }]
        );

        let snapshots = stock(&[("lamp", 10, 3), ("pen", 9, 0)]);
        let result = compute_availability(&def, &snapshots, 0, Utc::now()).unwrap();
        assert_eq!(result.max_quantity, 4);
        assert!(result.shell_max.is_none());
    }

    #[test]
    fn test_overbooked_bundle() {
        let def = definition(Some(10));
        let snapshots = stock(&[("lamp", 100, 0), ("pen", 100, 0)]);
        let result = compute_availability(&def, &snapshots, 12, Utc::now()).unwrap();

        assert!(result.overbooked);
        assert_eq!(result.shell_max, Some(0));
        assert_eq!(result.status, AvailabilityStatus::CapacityExhausted);
        assert!(matches!(
            result.ensure(1),
            Err(CoreError::InsufficientAvailability { requested: 1, available: 0, .. })
        ));
    }

    #[test]
    fn test_missing_snapshot_is_integrity_error() {
        let def = definition(None);
        let snapshots = stock(&[("lamp", 10, 0)]);
        let err = compute_availability(&def, &snapshots, 0, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Integrity { ref variant_id, .. } if variant_id == "pen"));
    }

    #[test]
    fn test_no_components_is_configuration_error() {
        let mut def = definition(None);
        def.components.clear();
        let err = compute_availability(&def, &HashMap::new(), 0, Utc::now()).unwrap_err();
        assert!(err.is_configuration());
    }

    fn statuses(pairs: &[(&str, ComponentStatus)]) -> HashMap<String, ComponentStatus> {
        pairs.iter().map(|(id, status)| (id.to_string(), *status)).collect()
    }

    #[test]
    fn test_disabled_component_blocks_sale() {
        let def = definition(None);
        let snapshots = stock(&[("lamp", 10, 0), ("pen", 20, 0)]);
        let known = statuses(&[("lamp", ComponentStatus::Active), ("pen", ComponentStatus::Disabled)]);

        let result = compute_sellable(&def, &snapshots, &known, 0, Utc::now()).unwrap();
        assert!(!result.is_available);
        assert_eq!(result.max_quantity, 0);
        assert_eq!(result.status, AvailabilityStatus::Broken);
        assert_eq!(result.reason.as_deref(), Some("broken"));
        assert!(result.ensure(1).is_err());

        let healthy = statuses(&[("lamp", ComponentStatus::Active), ("pen", ComponentStatus::Active)]);
        let result = compute_sellable(&def, &snapshots, &healthy, 0, Utc::now()).unwrap();
        assert_eq!(result.max_quantity, 10);
    }

    #[test]
    fn test_sellable_keeps_draft_and_integrity_outcomes() {
        let mut draft = definition(None);
        draft.status = BundleStatus::Draft;
        let disabled = statuses(&[("lamp", ComponentStatus::Disabled), ("pen", ComponentStatus::Active)]);
        let result = compute_sellable(&draft, &HashMap::new(), &disabled, 0, Utc::now()).unwrap();
        assert_eq!(result.status, AvailabilityStatus::Draft);

        let def = definition(None);
        let snapshots = stock(&[("lamp", 10, 0)]);
        let partial = statuses(&[("lamp", ComponentStatus::Disabled)]);
        let err = compute_sellable(&def, &snapshots, &partial, 0, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Integrity { ref variant_id, .. } if variant_id == "pen"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_final_never_exceeds_either_gate(
            lamp in 0i64..500,
            pen in 0i64..500,
            allocated in 0i64..100,
            cap in prop::option::of(0i64..200),
            reserved in 0i64..250,
        ) {
            let def = definition(cap);
            let snapshots = stock(&[("lamp", lamp, allocated), ("pen", pen, 0)]);
            let result = compute_availability(&def, &snapshots, reserved, Utc::now()).unwrap();

            prop_assert!(result.max_quantity >= 0);
            prop_assert!(result.max_quantity <= result.components_max);
            if let Some(shell) = result.shell_max {
                prop_assert!(result.max_quantity <= shell);
            }
            prop_assert_eq!(result.is_available, result.max_quantity > 0);
        }
    }
}
