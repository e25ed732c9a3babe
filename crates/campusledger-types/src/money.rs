//! Exact fixed-point money.
//!
//! `Money` is a [`Decimal`] held at scale 2. Every amount entering the
//! engine goes through exactly one parsing step ([`Money::from_str`] or
//! `TryFrom<Decimal>`), which rejects anything that cannot be represented
//! in whole cents without rounding. No floating point ever touches a balance.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::constants::MONEY_SCALE;
use crate::{LedgerError, Result};

/// Largest magnitude accepted by the parser, well inside `Decimal`'s range
/// at scale 2. Business ceilings are tighter (see `EngineConfig::max_amount`).
const PARSE_LIMIT: i64 = 1_000_000_000_000_000_000;

/// A monetary amount in the ledger currency, exact to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Build an amount from an integer number of cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, MONEY_SCALE))
    }

    /// Round an arbitrary decimal to cents (banker's rounding). Used only for
    /// derived figures such as normalized monthly costs, never for inputs.
    #[must_use]
    pub fn from_decimal_rounded(value: Decimal) -> Self {
        let mut rounded =
            value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(MONEY_SCALE);
        Self(rounded)
    }

    /// The underlying decimal, rescaled to two fractional digits.
    #[must_use]
    pub fn as_decimal(&self) -> Decimal {
        let mut value = self.0;
        value.rescale(MONEY_SCALE);
        value
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Strictly greater than zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// `self - other`, or `None` if the result would be negative.
    #[must_use]
    pub fn checked_sub_non_negative(self, other: Self) -> Option<Self> {
        self.checked_sub(other).filter(|rest| !rest.is_negative())
    }
}

impl TryFrom<Decimal> for Money {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        if value.abs() > Decimal::from(PARSE_LIMIT) {
            return Err(LedgerError::invalid_amount(format!(
                "{value} is out of range"
            )));
        }
        if value.normalize().scale() > MONEY_SCALE {
            return Err(LedgerError::invalid_amount(format!(
                "{value} has more than {MONEY_SCALE} fractional digits"
            )));
        }
        let mut exact = value;
        exact.rescale(MONEY_SCALE);
        Ok(Self(exact))
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.as_decimal()
    }
}

impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::invalid_amount("amount is empty"));
        }
        if trimmed.contains(['e', 'E']) {
            return Err(LedgerError::invalid_amount(format!(
                "'{trimmed}': exponent notation is not accepted"
            )));
        }
        let value = Decimal::from_str_exact(trimmed).map_err(|err| {
            LedgerError::invalid_amount(format!("'{trimmed}' is not a decimal amount: {err}"))
        })?;
        Self::try_from(value)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Money {
    /// Random amount in `[low, high]` cents.
    pub fn random_cents(low: i64, high: i64) -> Self {
        use rand::Rng;
        Self::from_cents(rand::thread_rng().gen_range(low..=high))
    }
}
