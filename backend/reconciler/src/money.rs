//! Fixed-point naira amounts.
//!
//! All money in the ledger, orders and commissions is whole kobo; floats only
//! appear at the JSON boundary.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Naira amount with 2 decimal places, stored as whole kobo.
///
/// On the wire a `Money` is a plain decimal number in major units
/// (`500.25`); in the database it is an integer column of minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    const SCALE: i64 = 100;

    pub const ZERO: Money = Money(0);

    pub fn from_major(value: f64) -> Self {
        Money((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_minor(value: i64) -> Self {
        Money(value)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn as_major(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `self × rate / 100`, rounded half-up to the nearest kobo.
    ///
    /// The rate is taken to two decimal places (basis points), so the
    /// result is exact integer arithmetic once the rate is fixed.
    pub fn percent(self, rate: f64) -> Money {
        let basis_points = (rate * 100.0).round() as i128;
        let scaled = self.0 as i128 * basis_points;
        let rounded = if scaled >= 0 {
            (scaled + 5_000) / 10_000
        } else {
            (scaled - 5_000) / 10_000
        };
        Money(rounded as i64)
    }

    /// Price for a (possibly fractional) quantity of units.
    pub fn times(self, quantity: f64) -> Money {
        Money((self.0 as f64 * quantity).round() as i64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:02}")
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() {
            return Err(de::Error::custom("amount must be a finite number"));
        }
        Ok(Money::from_major(value))
    }
}
