//! Monetary amounts in integer minor units.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// An amount of money in the smallest currency unit (e.g. paise).
///
/// Integer representation keeps every derived amount exact and reproducible;
/// rounding only happens when a percentage is applied (see [`Money::percent`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Apply a percentage expressed in basis points, rounding half-to-even to
    /// the minor unit.
    pub fn percent(self, rate: BasisPoints) -> Money {
        let product = i128::from(self.0) * i128::from(rate.0);
        let quotient = product.div_euclid(10_000);
        let remainder = product.rem_euclid(10_000);

        let rounded = match (remainder * 2).cmp(&10_000) {
            core::cmp::Ordering::Less => quotient,
            core::cmp::Ordering::Greater => quotient + 1,
            core::cmp::Ordering::Equal => {
                if quotient % 2 == 0 {
                    quotient
                } else {
                    quotient + 1
                }
            }
        };

        // |rate| <= 100% so the result never exceeds |self| (+1 for rounding).
        Money(rounded as i64)
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A rate in basis points (1 bp = 0.01%), capped at 100%.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BasisPoints(u32);

impl BasisPoints {
    pub const MAX: u32 = 10_000;

    /// Construct a rate; `None` when above 100%.
    pub const fn new(bp: u32) -> Option<Self> {
        if bp <= Self::MAX { Some(Self(bp)) } else { None }
    }

    /// Whole-percent constructor for compile-time constants.
    pub const fn from_percent(pct: u8) -> Self {
        let bp = pct as u32 * 100;
        if bp > Self::MAX { Self(Self::MAX) } else { Self(bp) }
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl ValueObject for BasisPoints {}
