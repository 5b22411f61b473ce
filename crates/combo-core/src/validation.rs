//! # Validation Module
//!
//! Configuration checks for bundle definitions.
//!
//! ## When Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  Admin creates/edits bundle ──► validate_bundle_definition()           │
//! │                                  └── reject before persisting           │
//! │                                                                         │
//! │  Draft → Active transition ───► validate_bundle_definition()           │
//! │                                                                         │
//! │  allocate(definition, qty) ───► validate_bundle_definition()           │
//! │                                  + validate_bundle_quantity()           │
//! │                                  └── reject before any pricing          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here coerces input: an invalid definition is an error, never a
//! "best effort" definition.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{BundleDefinition, Component, DiscountConfig, DiscountMode, Percent};
use crate::money::Money;
use crate::{MAX_BUNDLE_QUANTITY, MAX_COMPONENTS, MAX_COMPONENT_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Definition Validators
// =============================================================================

/// Validates a complete bundle definition.
///
/// ## Rules
/// - `id` and `name` present
/// - exactly one discount field set, matching `discount_mode`
/// - `percent_off` within 0-100%, `fixed_price_cents` not negative
/// - schedule window not empty
/// - `bundle_cap` and `bundle_reserved_open` not negative
/// - 1..=`MAX_COMPONENTS` components, no duplicate variants
/// - every component valid (see [`validate_component`])
pub fn validate_bundle_definition(definition: &BundleDefinition) -> ValidationResult<()> {
    if definition.id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    validate_bundle_name(&definition.name)?;

    validate_discount_fields(
        definition.discount_mode,
        definition.fixed_price_cents,
        definition.percent_off,
    )?;

    if let (Some(from), Some(to)) = (definition.valid_from, definition.valid_to) {
        if from > to {
            return Err(ValidationError::InvalidSchedule);
        }
    }

    if let Some(cap) = definition.bundle_cap {
        if cap < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "bundle_cap".to_string(),
            });
        }
    }

    if definition.bundle_reserved_open < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "bundle_reserved_open".to_string(),
        });
    }

    validate_components(&definition.components)
}

/// Validates the discount mode and its companion fields.
///
/// Returns the typed configuration on success.
pub fn validate_discount_fields(
    mode: DiscountMode,
    fixed_price_cents: Option<i64>,
    percent_off: Option<Percent>,
) -> ValidationResult<DiscountConfig> {
    match (mode, fixed_price_cents, percent_off) {
        (_, Some(_), Some(_)) => Err(ValidationError::MutuallyExclusive {
            first: "fixed_price_cents".to_string(),
            second: "percent_off".to_string(),
        }),
        (DiscountMode::Fixed, Some(cents), None) => {
            if cents < 0 {
                return Err(ValidationError::MustNotBeNegative {
                    field: "fixed_price_cents".to_string(),
                });
            }
            Ok(DiscountConfig::Fixed(Money::from_cents(cents)))
        }
        (DiscountMode::Percent, None, Some(pct)) => {
            if pct.bps() > Percent::MAX_BPS {
                return Err(ValidationError::OutOfRange {
                    field: "percent_off".to_string(),
                    min: 0,
                    max: 100,
                });
            }
            Ok(DiscountConfig::Percent(pct))
        }
        (DiscountMode::Fixed, _, _) => Err(ValidationError::Required {
            field: "fixed_price_cents".to_string(),
        }),
        (DiscountMode::Percent, _, _) => Err(ValidationError::Required {
            field: "percent_off".to_string(),
        }),
    }
}

/// Validates a bundle display name.
pub fn validate_bundle_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates the component list as a whole.
pub fn validate_components(components: &[Component]) -> ValidationResult<()> {
    if components.is_empty() {
        return Err(ValidationError::Required {
            field: "components".to_string(),
        });
    }

    if components.len() > MAX_COMPONENTS {
        return Err(ValidationError::OutOfRange {
            field: "components".to_string(),
            min: 1,
            max: MAX_COMPONENTS as i64,
        });
    }

    let mut seen = HashSet::with_capacity(components.len());
    for component in components {
        validate_component(component)?;
        if !seen.insert(component.variant_id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "variant_id".to_string(),
                value: component.variant_id.clone(),
            });
        }
    }

    Ok(())
}

/// Validates one component.
///
/// ## Rules
/// - `variant_id` present, at most 64 characters
/// - `quantity_per_bundle` in 1..=`MAX_COMPONENT_QUANTITY`
/// - `weight`, when set, positive
/// - `unit_price_snapshot` not negative
pub fn validate_component(component: &Component) -> ValidationResult<()> {
    let variant_id = component.variant_id.trim();
    if variant_id.is_empty() {
        return Err(ValidationError::Required {
            field: "variant_id".to_string(),
        });
    }
    if variant_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "variant_id".to_string(),
            max: 64,
        });
    }

    if component.quantity_per_bundle <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity_per_bundle".to_string(),
        });
    }
    if component.quantity_per_bundle > MAX_COMPONENT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity_per_bundle".to_string(),
            min: 1,
            max: MAX_COMPONENT_QUANTITY,
        });
    }

    if component.weight == Some(0) {
        return Err(ValidationError::MustBePositive {
            field: "weight".to_string(),
        });
    }

    if component.unit_price_snapshot.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price_snapshot".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a requested bundle quantity (1..=`MAX_BUNDLE_QUANTITY`).
pub fn validate_bundle_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_BUNDLE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_BUNDLE_QUANTITY,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
