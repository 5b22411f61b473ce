//! # Pricing Allocator
//!
//! Splits one bundle-level discount across the bundle's components, down to
//! the cent, with zero rounding drift.
//!
//! ## Allocation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Allocation Pipeline                                 │
//! │                                                                         │
//! │  1. subtotal_i = base_i × qty_per_bundle_i × bundle_qty                 │
//! │     total_pre_discount = Σ subtotal_i                                   │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  2. total_discount                                                      │
//! │     FIXED:   total_pre_discount − fixed × bundle_qty  (clamped ≥ 0)     │
//! │     PERCENT: round(total_pre_discount × pct)                            │
//! │                              │                                          │
//! │                 total_discount == 0 ? ──► return undiscounted           │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  3. adj_i                                                               │
//! │     PERCENT: −round(subtotal_i × pct)                                   │
//! │     FIXED:   −round(total_discount × weighted_share_i)                  │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  4. drift = total_discount − Σ(−adj_i)                                  │
//! │     whole drift → component with largest subtotal (first on ties)      │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  5. effective_i = base_i + round(adj_i / total_qty_i)                   │
//! │     verify: Σ adj_i == −total_discount, effective_i ≥ 0, adj_i ≤ 0      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All money math is integer cents with `i128` intermediates and one
//! rounding rule ([`round_div`]). The `f64` ratios reported per component
//! are for audit and display only.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::{round_div, Money};
use crate::types::{
    BundleDefinition, BundleLineMetadata, Component, DiscountConfig, DiscountMode,
};
use crate::validation::{validate_bundle_definition, validate_bundle_quantity};

// =============================================================================
// Result Types
// =============================================================================

/// Non-fatal findings of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationWarning {
    /// The fixed bundle price is not below the sum of component prices.
    /// No discount is applied.
    FixedPriceNotCheaper {
        total_pre_discount: Money,
        total_bundle_price: Money,
    },
}

/// The allocated price breakdown of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ComponentAllocation {
    pub variant_id: String,
    pub name: String,

    /// `quantity_per_bundle × bundle_quantity`.
    pub total_quantity: i64,

    pub base_unit_price: Money,

    /// `base_unit_price × total_quantity`.
    pub subtotal: Money,

    /// Signed discount for the whole line, always ≤ 0.
    pub bundle_adj_amount: Money,

    pub effective_unit_price: Money,

    /// Percentage of `subtotal` removed (0-100).
    pub bundle_pct_applied: f64,

    /// Unweighted fraction of the pre-discount total.
    pub bundle_share: f64,
}

/// The outcome of allocating a bundle discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocationResult {
    pub bundle_id: String,
    pub bundle_quantity: i64,
    pub discount_mode: DiscountMode,

    pub total_pre_discount: Money,
    pub total_bundle_price: Money,

    /// Always ≥ 0.
    pub total_discount: Money,

    /// Components in input order.
    pub components: Vec<ComponentAllocation>,

    /// Cents moved onto one component to remove rounding drift.
    pub drift_correction: Money,

    /// Index of the component that absorbed the drift, if any drift existed.
    pub drift_component: Option<usize>,

    pub warnings: Vec<AllocationWarning>,
}

impl AllocationResult {
    /// `Σ bundle_adj_amount`, equal to `−total_discount`.
    pub fn total_adjustment(&self) -> Money {
        self.components.iter().map(|c| c.bundle_adj_amount).sum()
    }

    /// Builds the order line metadata for one bundle purchase.
    ///
    /// The first line is the cosmetic header (`is_bundle_header = true`,
    /// zero prices, `quantity` = bundles). One line per component follows,
    /// in component order.
    pub fn to_line_metadata(&self, bundle_key: &str) -> Vec<BundleLineMetadata> {
        let mut lines = Vec::with_capacity(self.components.len() + 1);

        lines.push(BundleLineMetadata {
            bundle_key: bundle_key.to_string(),
            bundle_id: self.bundle_id.clone(),
            variant_id: None,
            is_bundle_header: true,
            quantity: self.bundle_quantity,
            base_unit_price: Money::zero(),
            effective_unit_price: Money::zero(),
            bundle_adj_amount: Money::zero(),
            bundle_pct_applied: 0.0,
            bundle_share: 0.0,
        });

        for component in &self.components {
            lines.push(BundleLineMetadata {
                bundle_key: bundle_key.to_string(),
                bundle_id: self.bundle_id.clone(),
                variant_id: Some(component.variant_id.clone()),
                is_bundle_header: false,
                quantity: component.total_quantity,
                base_unit_price: component.base_unit_price,
                effective_unit_price: component.effective_unit_price,
                bundle_adj_amount: component.bundle_adj_amount,
                bundle_pct_applied: component.bundle_pct_applied,
                bundle_share: component.bundle_share,
            });
        }

        lines
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Allocates the discount of `definition` for `bundle_quantity` bundles.
///
/// The definition is validated first; a bad definition never reaches the
/// pricing math. Component base prices are their `unit_price_snapshot`.
///
/// ## Errors
/// - `Configuration` for an invalid definition or quantity
/// - `Drift` if the allocation cannot satisfy its invariants
pub fn allocate(definition: &BundleDefinition, bundle_quantity: i64) -> CoreResult<AllocationResult> {
    validate_bundle_definition(definition)?;
    let config = definition.discount()?;
    allocate_components(&definition.id, &definition.components, bundle_quantity, config)
}

/// Allocates a discount over an explicit component list.
///
/// Lower-level than [`allocate`]: only the quantity is validated.
pub fn allocate_components(
    bundle_id: &str,
    components: &[Component],
    bundle_quantity: i64,
    config: DiscountConfig,
) -> CoreResult<AllocationResult> {
    validate_bundle_quantity(bundle_quantity)?;

    let mode = match config {
        DiscountConfig::Fixed(_) => DiscountMode::Fixed,
        DiscountConfig::Percent(_) => DiscountMode::Percent,
    };

    // Step 1: subtotals
    let mut lines: Vec<ComponentAllocation> = components
        .iter()
        .map(|c| {
            let total_quantity = c.quantity_per_bundle * bundle_quantity;
            ComponentAllocation {
                variant_id: c.variant_id.clone(),
                name: c.name.clone(),
                total_quantity,
                base_unit_price: c.unit_price_snapshot,
                subtotal: c.unit_price_snapshot.multiply_quantity(total_quantity),
                bundle_adj_amount: Money::zero(),
                effective_unit_price: c.unit_price_snapshot,
                bundle_pct_applied: 0.0,
                bundle_share: 0.0,
            }
        })
        .collect();

    let total_pre_discount: Money = lines.iter().map(|l| l.subtotal).sum();
    if total_pre_discount.is_positive() {
        for line in &mut lines {
            line.bundle_share = line.subtotal.cents() as f64 / total_pre_discount.cents() as f64;
        }
    }

    // Step 2: total discount
    let mut warnings = Vec::new();
    let (total_bundle_price, total_discount) = match config {
        DiscountConfig::Fixed(price) => {
            let bundle_price = price.multiply_quantity(bundle_quantity);
            let discount = total_pre_discount - bundle_price;
            if !discount.is_positive() {
                warn!(
                    bundle_id = %bundle_id,
                    total_pre_discount = total_pre_discount.cents(),
                    bundle_price = bundle_price.cents(),
                    "Fixed bundle price is not cheaper than its components"
                );
                warnings.push(AllocationWarning::FixedPriceNotCheaper {
                    total_pre_discount,
                    total_bundle_price: bundle_price,
                });
                (total_pre_discount, Money::zero())
            } else {
                (bundle_price, discount)
            }
        }
        DiscountConfig::Percent(pct) => {
            let discount = total_pre_discount.percent_of(pct);
            (total_pre_discount - discount, discount)
        }
    };

    let mut result = AllocationResult {
        bundle_id: bundle_id.to_string(),
        bundle_quantity,
        discount_mode: mode,
        total_pre_discount,
        total_bundle_price,
        total_discount,
        components: lines,
        drift_correction: Money::zero(),
        drift_component: None,
        warnings,
    };

    // Step 3: nothing to allocate
    if total_discount.is_zero() {
        return Ok(result);
    }

    // Step 4: per-component adjustment
    match config {
        DiscountConfig::Percent(pct) => {
            for line in &mut result.components {
                line.bundle_adj_amount = -line.subtotal.percent_of(pct);
            }
        }
        DiscountConfig::Fixed(_) => {
            let weights: Vec<i128> = components
                .iter()
                .map(|c| c.effective_weight() as i128)
                .collect();
            let weighted_total: i128 = result
                .components
                .iter()
                .zip(&weights)
                .map(|(line, w)| line.subtotal.cents() as i128 * w)
                .sum();
            for (line, w) in result.components.iter_mut().zip(&weights) {
                let weighted = line.subtotal.cents() as i128 * w;
                line.bundle_adj_amount = -total_discount.prorate(weighted, weighted_total);
            }
        }
    }

    // Step 5: drift correction
    let allocated: Money = -result.total_adjustment();
    let drift = total_discount - allocated;
    if !drift.is_zero() {
        let index = largest_subtotal_index(&result.components);
        result.components[index].bundle_adj_amount -= drift;
        result.drift_correction = drift;
        result.drift_component = Some(index);
        debug!(
            bundle_id = %bundle_id,
            drift = drift.cents(),
            component = %result.components[index].variant_id,
            "Applied drift correction"
        );
    }

    // Step 6: effective prices and ratios
    for line in &mut result.components {
        if line.bundle_adj_amount.is_positive() {
            return Err(drift_error(
                bundle_id,
                format!(
                    "component {} received a positive adjustment of {} cents",
                    line.variant_id,
                    line.bundle_adj_amount.cents()
                ),
            ));
        }

        let per_unit = round_div(line.bundle_adj_amount.cents() as i128, line.total_quantity as i128);
        let effective = line.base_unit_price.cents() as i128 + per_unit;
        if effective < 0 {
            return Err(drift_error(
                bundle_id,
                format!(
                    "component {} would have a negative effective unit price ({} cents)",
                    line.variant_id, effective
                ),
            ));
        }
        line.effective_unit_price = Money::from_cents(effective as i64).non_negative();

        line.bundle_pct_applied = match config {
            DiscountConfig::Percent(pct) => pct.percentage(),
            DiscountConfig::Fixed(_) if line.subtotal.is_positive() => {
                -(line.bundle_adj_amount.cents() as f64) / line.subtotal.cents() as f64 * 100.0
            }
            DiscountConfig::Fixed(_) => 0.0,
        };
    }

    // Step 7: final invariant
    let final_total = result.total_adjustment();
    if final_total != -total_discount {
        return Err(drift_error(
            bundle_id,
            format!(
                "adjustments sum to {} cents, expected {}",
                final_total.cents(),
                -total_discount.cents()
            ),
        ));
    }

    Ok(result)
}

// =============================================================================
// Helpers
// =============================================================================

/// Index of the largest subtotal; the first one wins ties.
fn largest_subtotal_index(lines: &[ComponentAllocation]) -> usize {
    let mut best = 0;
    for (index, line) in lines.iter().enumerate().skip(1) {
        if line.subtotal > lines[best].subtotal {
            best = index;
        }
    }
    best
}

fn drift_error(bundle_id: &str, detail: String) -> CoreError {
    error!(bundle_id = %bundle_id, detail = %detail, "Bundle allocation drift");
    CoreError::drift(bundle_id, detail)
}

// =============================================================================
// Unit Tests
// =============================================================================
