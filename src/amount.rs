use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
///
/// Used for ticket prices and order totals; `to_minor_units` converts to the
/// smallest currency unit the payment provider expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 10_000;
    /// Minor currency units (e.g. paisa, cents) per whole unit.
    const MINOR_PER_UNIT: i64 = 100;

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Amount in the smallest currency unit, truncating sub-minor precision.
    pub fn to_minor_units(&self) -> i64 {
        self.0 / (Self::SCALE / Self::MINOR_PER_UNIT)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Mul<u32> for Amount {
    type Output = Self;

    /// Order total for a ticket count at this unit price.
    fn mul(self, rhs: u32) -> Self::Output {
        Amount(self.0 * i64::from(rhs))
    }
}
