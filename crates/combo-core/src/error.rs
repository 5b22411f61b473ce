//! # Error Types
//!
//! Domain-specific error types for combo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  combo-core errors (this file)                                          │
//! │  ├── CoreError        - Configuration / integrity / drift failures      │
//! │  └── ValidationError  - Field-level definition problems                 │
//! │                                                                         │
//! │  combo-db errors (separate crate)                                       │
//! │  └── DbError          - Storage failures                                │
//! │                                                                         │
//! │  combo-engine errors                                                    │
//! │  └── EngineError      - What the host sees                              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Host       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## What Is NOT An Error
//! "Insufficient stock", "out of schedule" and "capacity exhausted" are
//! expected outcomes carried by `AvailabilityResult`, never raised here.
//! `InsufficientAvailability` exists only for callers that explicitly ask
//! to hard-stop on a requested quantity.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Bundle domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid bundle definition.
    ///
    /// Raised synchronously at creation/edit time and before any pricing or
    /// availability work. Never silently coerced.
    #[error("Invalid bundle configuration: {0}")]
    Configuration(#[from] ValidationError),

    /// A component referenced by a bundle is missing, deleted or disabled.
    ///
    /// The bundle is reported broken and no pricing or availability is
    /// computed for it.
    #[error("Bundle {bundle_id} references unusable component {variant_id}: {reason}")]
    Integrity {
        bundle_id: String,
        variant_id: String,
        reason: String,
    },

    /// Allocation invariant failure (sum mismatch or negative price).
    ///
    /// Unreachable through a correct allocator; the operation is aborted and
    /// logged as a bug.
    #[error("Allocation drift for bundle {bundle_id}: {detail}")]
    Drift { bundle_id: String, detail: String },

    /// A requested quantity exceeds the computed sellable quantity.
    #[error("Bundle {bundle_id}: requested {requested}, available {available}")]
    InsufficientAvailability {
        bundle_id: String,
        requested: i64,
        available: i64,
    },

    /// A promotion exclusion pattern could not be compiled.
    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl CoreError {
    pub fn integrity(
        bundle_id: impl Into<String>,
        variant_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::Integrity {
            bundle_id: bundle_id.into(),
            variant_id: variant_id.into(),
            reason: reason.into(),
        }
    }

    pub fn drift(bundle_id: impl Into<String>, detail: impl Into<String>) -> Self {
        CoreError::Drift {
            bundle_id: bundle_id.into(),
            detail: detail.into(),
        }
    }

    /// Returns true for errors caused by the input definition or policy.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::Configuration(_) | CoreError::InvalidPattern { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Field-level configuration errors for bundle definitions.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Two fields that must not both be set.
    #[error("{first} and {second} are mutually exclusive")]
    MutuallyExclusive { first: String, second: String },

    /// Duplicate value (e.g., the same variant twice in one bundle).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },

    /// `valid_from` is after `valid_to`.
    #[error("schedule window is empty: valid_from is after valid_to")]
    InvalidSchedule,
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientAvailability {
            bundle_id: "b-1".to_string(),
            requested: 5,
            available: 3,
        };
        assert_eq!(err.to_string(), "Bundle b-1: requested 5, available 3");

        let err = CoreError::integrity("b-1", "v-9", "deleted");
        assert_eq!(
            err.to_string(),
            "Bundle b-1 references unusable component v-9: deleted"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::InvalidSchedule.into();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(err.is_configuration());
        assert!(!CoreError::drift("b", "x").is_configuration());
    }

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::MutuallyExclusive {
            first: "fixed_price_cents".to_string(),
            second: "percent_off".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "fixed_price_cents and percent_off are mutually exclusive"
        );
    }
}
