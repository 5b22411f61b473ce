//! # Bundle Health
//!
//! Read-time health of a bundle. Brokenness and expiry are computed from
//! current component state, never stored as bundle status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{BundleDefinition, ComponentStatus, SchedulePosition};

/// Why a component makes its bundle broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BrokenReason {
    /// Not present in the stock store.
    Missing,
    Deleted,
    Disabled,
}

impl BrokenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokenReason::Missing => "missing",
            BrokenReason::Deleted => "deleted",
            BrokenReason::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BrokenComponent {
    pub variant_id: String,
    pub reason: BrokenReason,
}

/// Computed health flags of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BundleHealth {
    pub bundle_id: String,
    pub is_broken: bool,
    /// `now > valid_to`.
    pub is_expired: bool,
    pub within_schedule: bool,
    /// Active, within schedule and not broken.
    pub is_available: bool,
    pub broken_components: Vec<BrokenComponent>,
}

impl BundleHealth {
    /// True when the flags a monitor compares differ.
    pub fn differs_from(&self, other: &BundleHealth) -> bool {
        self.is_broken != other.is_broken
            || self.is_expired != other.is_expired
            || self.is_available != other.is_available
    }
}

/// Assesses a bundle against the current status of its components.
///
/// A variant absent from `statuses` is reported `Missing`.
pub fn assess_health(
    definition: &BundleDefinition,
    statuses: &HashMap<String, ComponentStatus>,
    now: DateTime<Utc>,
) -> BundleHealth {
    let broken_components: Vec<BrokenComponent> = definition
        .components
        .iter()
        .filter_map(|c| {
            let reason = match statuses.get(&c.variant_id) {
                None => BrokenReason::Missing,
                Some(ComponentStatus::Deleted) => BrokenReason::Deleted,
                Some(ComponentStatus::Disabled) => BrokenReason::Disabled,
                Some(ComponentStatus::Active) => return None,
            };
            Some(BrokenComponent {
                variant_id: c.variant_id.clone(),
                reason,
            })
        })
        .collect();

    let position = definition.schedule_position(now);
    let is_broken = !broken_components.is_empty();
    let within_schedule = position == SchedulePosition::Within;

    BundleHealth {
        bundle_id: definition.id.clone(),
        is_broken,
        is_expired: position == SchedulePosition::Expired,
        within_schedule,
        is_available: definition.is_active() && within_schedule && !is_broken,
        broken_components,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::{BundleStatus, Component, DiscountMode};
    use chrono::Duration;

    fn definition() -> BundleDefinition {
        let now = Utc::now();
        let component = |id: &str| Component {
            variant_id: id.to_string(),
            name: id.to_string(),
            quantity_per_bundle: 1,
            weight: None,
            unit_price_snapshot: Money::from_cents(500),
        };
        BundleDefinition {
            id: "b-1".to_string(),
            name: "Gift Box".to_string(),
            status: BundleStatus::Active,
            discount_mode: DiscountMode::Fixed,
            fixed_price_cents: Some(800),
            percent_off: None,
            valid_from: None,
            valid_to: None,
            bundle_cap: None,
            bundle_reserved_open: 0,
            components: vec![component("a"), component("b"), component("c")],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_healthy_bundle() {
        let statuses = HashMap::from([
            ("a".to_string(), ComponentStatus::Active),
            ("b".to_string(), ComponentStatus::Active),
            ("c".to_string(), ComponentStatus::Active),
        ]);
        let health = assess_health(&definition(), &statuses, Utc::now());
        assert!(!health.is_broken);
        assert!(health.is_available);
        assert!(health.broken_components.is_empty());
    }

    #[test]
    fn test_broken_reasons() {
        let statuses = HashMap::from([
            ("a".to_string(), ComponentStatus::Active),
            ("b".to_string(), ComponentStatus::Disabled),
        ]);
        let health = assess_health(&definition(), &statuses, Utc::now());
        assert!(health.is_broken);
        assert!(!health.is_available);
        assert_eq!(
            health.broken_components,
            vec![
                BrokenComponent { variant_id: "b".to_string(), reason: BrokenReason::Disabled },
                BrokenComponent { variant_id: "c".to_string(), reason: BrokenReason::Missing },
            ]
        );
    }

    #[test]
    fn test_expired_and_draft() {
        let statuses = HashMap::from([
            ("a".to_string(), ComponentStatus::Active),
            ("b".to_string(), ComponentStatus::Active),
            ("c".to_string(), ComponentStatus::Active),
        ]);
        let now = Utc::now();

        let mut def = definition();
        def.valid_to = Some(now - Duration::minutes(5));
        let health = assess_health(&def, &statuses, now);
        assert!(health.is_expired);
        assert!(!health.within_schedule);
        assert!(!health.is_available);

        let mut def = definition();
        def.status = BundleStatus::Draft;
        let health = assess_health(&def, &statuses, now);
        assert!(!health.is_expired);
        assert!(!health.is_available);
    }

    #[test]
    fn test_differs_from() {
        let healthy = assess_health(
            &definition(),
            &HashMap::from([
                ("a".to_string(), ComponentStatus::Active),
                ("b".to_string(), ComponentStatus::Active),
                ("c".to_string(), ComponentStatus::Active),
            ]),
            Utc::now(),
        );
        let broken = assess_health(&definition(), &HashMap::new(), Utc::now());
        assert!(healthy.differs_from(&broken));
        assert!(!broken.differs_from(&broken.clone()));
    }
}
