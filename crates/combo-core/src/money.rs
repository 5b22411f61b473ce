//! # Money
//!
//! Signed integer cents. Every price, discount and allocation in the crate
//! is a [`Money`]; floating point only appears in derived display fields
//! such as `bundle_pct_applied`.
//!
//! Splitting a discount over components loses cents to rounding (100¢ over
//! three equal parts is 33 + 33 + 33). [`round_div`] fixes the rounding rule
//! and `pricing::allocate` hands the leftover cent to one component.
//!
//! ```rust
//! use combo_core::money::Money;
//! use combo_core::types::Percent;
//!
//! let line = Money::from_cents(1099).multiply_quantity(2);
//! assert_eq!(line.cents(), 2198);
//! assert_eq!(line.percent_of(Percent::from_bps(1000)).cents(), 220);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::types::Percent;

// =============================================================================
// Rounding
// =============================================================================

/// Integer division rounding half away from zero.
///
/// All proration in this crate goes through this one rule so that identical
/// inputs always round identically.
///
/// ```rust
/// use combo_core::money::round_div;
///
/// assert_eq!(round_div(5, 2), 3);
/// assert_eq!(round_div(-5, 2), -3);
/// assert_eq!(round_div(4, 3), 1);
/// ```
pub fn round_div(numerator: i128, denominator: i128) -> i128 {
    debug_assert!(denominator != 0, "round_div by zero");
    let (n, d) = if denominator < 0 {
        (-numerator, -denominator)
    } else {
        (numerator, denominator)
    };
    if n >= 0 {
        (n + d / 2) / d
    } else {
        -((-n + d / 2) / d)
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// Amount in cents. Bundle adjustments are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Negative amounts become zero.
    #[inline]
    pub const fn non_negative(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            Money(self.0)
        }
    }

    /// Line total for `qty` units.
    ///
    /// ```rust
    /// use combo_core::money::Money;
    ///
    /// let unit = Money::from_cents(299);
    /// assert_eq!(unit.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns `percent` of this amount, rounded half away from zero.
    ///
    /// ## Implementation
    /// Integer math on basis points: `round(amount × bps / 10000)`.
    /// `i128` intermediates keep large carts from overflowing.
    ///
    /// ```rust
    /// use combo_core::money::Money;
    /// use combo_core::types::Percent;
    ///
    /// // 10% of $0.05 = 0.5 cents → rounds to 1 cent
    /// assert_eq!(Money::from_cents(5).percent_of(Percent::from_bps(1000)).cents(), 1);
    /// ```
    pub fn percent_of(&self, percent: Percent) -> Money {
        let cents = round_div(self.0 as i128 * percent.bps() as i128, 10_000);
        Money(cents as i64)
    }

    /// Returns `self × numerator / denominator`, rounded half away from zero.
    ///
    /// Used for proportional splits where the ratio is itself a ratio of
    /// money amounts (e.g. a component subtotal over the bundle total).
    pub fn prorate(&self, numerator: i128, denominator: i128) -> Money {
        Money(round_div(self.0 as i128 * numerator, denominator) as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented display (`-$5.50`); the host formats for real UI.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, magnitude / 100, magnitude % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert!(money.is_positive());
        assert!(Money::from_cents(-1).is_negative());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::zero()), "$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((-a).cents(), -1000);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_round_div_half_away_from_zero() {
        assert_eq!(round_div(1, 2), 1);
        assert_eq!(round_div(-1, 2), -1);
        assert_eq!(round_div(3, 2), 2);
        assert_eq!(round_div(-3, 2), -2);
        assert_eq!(round_div(2, 3), 1);
        assert_eq!(round_div(1, 3), 0);
        assert_eq!(round_div(7, -2), -4);
        assert_eq!(round_div(0, 7), 0);
    }

    #[test]
    fn test_percent_of() {
        let subtotal = Money::from_cents(2000);
        assert_eq!(subtotal.percent_of(Percent::from_bps(1000)).cents(), 200);

        // 8.25% of $10.00 = 82.5 → 83
        let amount = Money::from_cents(1000);
        assert_eq!(amount.percent_of(Percent::from_bps(825)).cents(), 83);

        assert_eq!(amount.percent_of(Percent::zero()).cents(), 0);
        assert_eq!(amount.percent_of(Percent::full()).cents(), 1000);
    }

    #[test]
    fn test_prorate() {
        // 100 cents × 333 / 1000 = 33.3 → 33
        let discount = Money::from_cents(100);
        assert_eq!(discount.prorate(333, 1000).cents(), 33);
        // 100 × 335 / 1000 = 33.5 → 34
        assert_eq!(discount.prorate(335, 1000).cents(), 34);
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(Money::from_cents(-5).non_negative(), Money::zero());
        assert_eq!(Money::from_cents(5).non_negative().cents(), 5);
    }

    /// Documents why drift correction exists at all.
    #[test]
    fn test_equal_split_loses_a_cent() {
        let discount = Money::from_cents(100);
        let share = discount.prorate(1, 3);
        let reconstructed = share * 3;
        assert_eq!(reconstructed.cents(), 99);
        assert_eq!((discount - reconstructed).cents(), 1);
    }
}
