//! # Reservation Accounting
//!
//! Pure rules for the per-bundle "paid but not yet fulfilled" counter.
//!
//! ```text
//!   AddingItems ─► ArrangingPayment ─► PaymentAuthorized ─► ... ─► Delivered
//!        ▲                ▲            │                            │
//!        │                │   entering open: +qty      leaving open: −qty
//!        └────────────────┴────────────┤                            │
//!                                      └──── Cancelled ◄────────────┘
//! ```
//!
//! Leaving the open set releases the reservation whatever the target, so a
//! declined payment that sends the order back to `ArrangingPayment` and a
//! later re-authorization net out to one reservation.
//!
//! Storage applies the delta atomically; this module only decides what the
//! delta is and how it clamps.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::OrderState;

/// An order-state change affecting one bundle on that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTransition {
    pub order_id: String,
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub bundle_id: String,
    /// Bundles of `bundle_id` on the order.
    pub quantity: i64,
}

impl OrderTransition {
    /// The reservation delta this transition implies.
    pub fn delta(&self) -> i64 {
        reservation_delta(self.from_state, self.to_state, self.quantity)
    }
}

/// An open order containing a bundle, as reported by the order store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OpenOrderRef {
    pub order_id: String,
    pub quantity: i64,
}

/// Maps an order transition to a signed change of the reservation counter.
///
/// - not open → open: `+qty`
/// - open → not open: `−qty`
/// - anything else: 0
pub fn reservation_delta(from: OrderState, to: OrderState, qty: i64) -> i64 {
    let qty = qty.max(0);
    match (from.is_open(), to.is_open()) {
        (false, true) => qty,
        (true, false) => -qty,
        _ => 0,
    }
}

/// Applies `delta` to `current`, never going below 0.
#[inline]
pub fn apply_delta(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).max(0)
}

/// Sum of quantities over open orders; the authoritative counter value.
pub fn recompute_reserved(open_orders: &[OpenOrderRef]) -> i64 {
    open_orders.iter().map(|o| o.quantity.max(0)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entering_open_reserves() {
        assert_eq!(
            reservation_delta(OrderState::ArrangingPayment, OrderState::PaymentAuthorized, 3),
            3
        );
        assert_eq!(
            reservation_delta(OrderState::AddingItems, OrderState::PaymentSettled, 2),
            2
        );
    }

    #[test]
    fn test_moving_within_open_is_neutral() {
        assert_eq!(
            reservation_delta(OrderState::PaymentAuthorized, OrderState::PaymentSettled, 3),
            0
        );
        assert_eq!(
            reservation_delta(OrderState::Shipped, OrderState::PartiallyDelivered, 3),
            0
        );
    }

    #[test]
    fn test_closing_releases() {
        assert_eq!(reservation_delta(OrderState::Shipped, OrderState::Delivered, 4), -4);
        assert_eq!(
            reservation_delta(OrderState::PaymentSettled, OrderState::Cancelled, 4),
            -4
        );
        // never opened, so nothing to release
        assert_eq!(
            reservation_delta(OrderState::ArrangingPayment, OrderState::Cancelled, 4),
            0
        );
    }

    #[test]
    fn test_payment_rollback_releases() {
        assert_eq!(
            reservation_delta(OrderState::PaymentAuthorized, OrderState::ArrangingPayment, 3),
            -3
        );
        assert_eq!(
            reservation_delta(OrderState::PaymentSettled, OrderState::AddingItems, 3),
            -3
        );

        let mut counter = 0;
        for (from, to) in [
            (OrderState::ArrangingPayment, OrderState::PaymentAuthorized),
            (OrderState::PaymentAuthorized, OrderState::ArrangingPayment),
            (OrderState::ArrangingPayment, OrderState::PaymentAuthorized),
        ] {
            counter = apply_delta(counter, reservation_delta(from, to, 3));
        }
        assert_eq!(counter, 3);
    }

    #[test]
    fn test_apply_delta_clamps() {
        assert_eq!(apply_delta(2, -5), 0);
        assert_eq!(apply_delta(2, 5), 7);
        assert_eq!(apply_delta(0, -1), 0);
    }

    #[test]
    fn test_recompute_reserved() {
        let orders = vec![
            OpenOrderRef { order_id: "o1".to_string(), quantity: 2 },
            OpenOrderRef { order_id: "o2".to_string(), quantity: 5 },
        ];
        assert_eq!(recompute_reserved(&orders), 7);
        assert_eq!(recompute_reserved(&[]), 0);
    }

    fn any_state() -> impl Strategy<Value = OrderState> {
        prop::sample::select(OrderState::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_counter_never_negative(
            start in 0i64..50,
            steps in prop::collection::vec((any_state(), any_state(), 0i64..20), 0..40),
        ) {
            let mut counter = start;
            for (from, to, qty) in steps {
                counter = apply_delta(counter, reservation_delta(from, to, qty));
                prop_assert!(counter >= 0);
            }
        }

        #[test]
        fn prop_counter_tracks_open_state(
            path in prop::collection::vec(any_state(), 0..40),
            qty in 0i64..20,
        ) {
            let mut state = OrderState::AddingItems;
            let mut counter = 0;
            for next in path {
                counter = apply_delta(counter, reservation_delta(state, next, qty));
                state = next;
            }
            prop_assert_eq!(counter, if state.is_open() { qty } else { 0 });
        }

        #[test]
        fn prop_raw_decrements_never_negative(
            start in 0i64..50,
            deltas in prop::collection::vec(-100i64..100, 0..40),
        ) {
            let mut counter = start;
            for delta in deltas {
                counter = apply_delta(counter, delta);
                prop_assert!(counter >= 0);
            }
        }
    }
}
