//! Arbitrary-precision token amounts.
//!
//! Request payloads carry per-token amounts that may exceed 64-bit range.
//! `Amount` wraps [`num_bigint::BigInt`] so parsing, arithmetic, and storage
//! never go through a lossy floating-point or fixed-width intermediate.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigInt);

impl Amount {
    pub fn zero() -> Self {
        Amount(BigInt::zero())
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn neg(&self) -> Self {
        Amount(-&self.0)
    }

    pub fn checked_add(&self, other: &Amount) -> Amount {
        Amount(&self.0 + &other.0)
    }

    pub fn checked_sub(&self, other: &Amount) -> Amount {
        Amount(&self.0 - &other.0)
    }

    /// `NUMERIC` has no native big-integer binding in sqlx; the store binds
    /// this string and casts it (`$1::numeric`) rather than using a macro
    /// query, so the crate builds without a live database connection.
    pub fn to_numeric_string(&self) -> String {
        self.0.to_string()
    }

    pub fn from_numeric_string(s: &str) -> Result<Self, BigIntParseError> {
        BigInt::from_str(s.trim()).map(Amount).map_err(|_| BigIntParseError)
    }

    /// Parses a `serde_json::Number` produced with the `arbitrary_precision`
    /// feature, preserving exactness for values beyond i64/u64/f64 range.
    pub fn from_json_number(n: &serde_json::Number) -> Result<Self, BigIntParseError> {
        Self::from_numeric_string(&n.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigIntParseError;

impl fmt::Display for BigIntParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value is not a valid integer")
    }
}

impl std::error::Error for BigIntParseError {}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Amount {
    fn from(v: i64) -> Self {
        Amount(BigInt::from(v))
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Amount(BigInt::from(v))
    }
}

impl FromStr for Amount {
    type Err = BigIntParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_numeric_string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_beyond_u64() {
        let huge = "184467440737095516150000";
        let amount = Amount::from_numeric_string(huge).unwrap();
        assert_eq!(amount.to_numeric_string(), huge);
    }

    #[test]
    fn arithmetic_is_exact() {
        let a = Amount::from(100i64);
        let b = Amount::from(40i64);
        assert_eq!(a.checked_sub(&b).to_numeric_string(), "60");
        assert_eq!(b.checked_add(&a).to_numeric_string(), "140");
    }

    #[test]
    fn sign_checks() {
        assert!(Amount::from(1i64).is_positive());
        assert!(Amount::from(-1i64).is_negative());
        assert!(Amount::zero().is_zero());
    }
}
