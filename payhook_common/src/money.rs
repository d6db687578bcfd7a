use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

//--------------------------------------       Money         ---------------------------------------------------------
/// A monetary amount, stored as an integer number of minor units (cents).
///
/// Provider payloads report amounts in a mix of minor units (PsiFi's `totalAmount`) and major-unit decimal strings
/// (PayGate365's `value_coin`). Both converge on `Money` at the normalization boundary, so everything past the
/// provider adapters deals in a single representation.
#[derive(Debug, Clone, Copy, Default, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a monetary amount: {0}")]
pub struct MoneyConversionError(pub String);

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Money {}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TryFrom<u64> for Money {
    type Error = MoneyConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(MoneyConversionError(format!("Value {value} is too large to convert to Money")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.abs();
        write!(f, "{sign}${}.{:02}", cents / 100, cents % 100)
    }
}

/// Parses a major-unit decimal string, e.g. "59.99" or "150". At most two decimal places are accepted, since minor
/// units are the smallest representable denomination.
impl FromStr for Money {
    type Err = MoneyConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoneyConversionError("empty string".into()));
        }
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if frac.len() > 2 {
            return Err(MoneyConversionError(format!("Too many decimal places in '{s}'")));
        }
        // Both parts must be bare digits. i64 parsing alone would admit an embedded sign, so "1.-5"
        // must not slip through as 95 cents.
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyConversionError(format!("Invalid amount '{s}'")));
        }
        let whole = if whole.is_empty() { 0 } else { whole.parse::<i64>().map_err(|e| MoneyConversionError(format!("Invalid amount '{s}': {e}")))? };
        let mut frac_cents = if frac.is_empty() { 0 } else { frac.parse::<i64>().map_err(|e| MoneyConversionError(format!("Invalid amount '{s}': {e}")))? };
        if frac.len() == 1 {
            frac_cents *= 10;
        }
        Ok(Self(sign * (whole * 100 + frac_cents)))
    }
}

impl Money {
    /// The amount in minor units (cents).
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Construct from a whole number of major units (dollars).
    pub fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// `pct` percent of this amount, truncated towards zero.
    pub fn percent(&self, pct: i64) -> Self {
        Self(self.0 * pct / 100)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minor_units_are_not_inflated() {
        // 4999 minor units is $49.99, not $4999.00
        let m = Money::from_cents(4999);
        assert_eq!(m.to_string(), "$49.99");
        assert_eq!(m.value(), 4999);
    }

    #[test]
    fn parses_major_unit_strings() {
        assert_eq!("59.99".parse::<Money>().unwrap(), Money::from_cents(5999));
        assert_eq!("150".parse::<Money>().unwrap(), Money::from_major(150));
        assert_eq!("0.6".parse::<Money>().unwrap(), Money::from_cents(60));
        assert_eq!("-2.50".parse::<Money>().unwrap(), Money::from_cents(-250));
        assert!("1.999".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn rejects_signs_inside_amounts() {
        assert!("1.-5".parse::<Money>().is_err());
        assert!("1.+5".parse::<Money>().is_err());
        assert!("+1.00".parse::<Money>().is_err());
        assert!("-1.-1".parse::<Money>().is_err());
    }

    #[test]
    fn percent_truncates_towards_zero() {
        assert_eq!(Money::from_major(100).percent(60), Money::from_cents(6000));
        assert_eq!(Money::from_cents(9999).percent(60), Money::from_cents(5999));
    }

    #[test]
    fn display_pads_cents() {
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-5).to_string(), "-$0.05");
    }
}
