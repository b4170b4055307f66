//! Arbitrary-precision gas quantities
//!
//! Gas used, gas price and spend totals are unsigned integers of unbounded
//! size. On the wire (JSON, SQLite TEXT columns) they are always plain
//! decimal strings, e.g. `"21000"` or `"340282366920938463463374607431768211456"`.
//!
//! Arithmetic never goes through floating point.

use num_bigint::BigUint;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParseError {
    Empty,
    InvalidDigit(String),
}

impl fmt::Display for GasParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GasParseError::Empty => write!(f, "empty gas quantity"),
            GasParseError::InvalidDigit(s) => write!(f, "invalid gas quantity: {:?}", s),
        }
    }
}

impl std::error::Error for GasParseError {}

/// Unsigned arbitrary-precision integer with a decimal-string encoding
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GasAmount(BigUint);

impl GasAmount {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    /// Parse a JSON-RPC hex quantity such as `0x5208`
    pub fn from_hex_quantity(s: &str) -> Result<Self, GasParseError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(GasParseError::Empty);
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GasParseError::InvalidDigit(s.to_string()));
        }
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Self)
            .ok_or_else(|| GasParseError::InvalidDigit(s.to_string()))
    }

    pub fn to_decimal_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl FromStr for GasAmount {
    type Err = GasParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(GasParseError::Empty);
        }
        // BigUint's own parser tolerates '_' separators and a leading '+'
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GasParseError::InvalidDigit(s.to_string()));
        }
        BigUint::parse_bytes(s.as_bytes(), 10)
            .map(Self)
            .ok_or_else(|| GasParseError::InvalidDigit(s.to_string()))
    }
}

impl From<u64> for GasAmount {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<u128> for GasAmount {
    fn from(value: u128) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for GasAmount {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl fmt::Display for GasAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<&GasAmount> for &GasAmount {
    type Output = GasAmount;

    fn add(self, rhs: &GasAmount) -> GasAmount {
        GasAmount(&self.0 + &rhs.0)
    }
}

impl Add for GasAmount {
    type Output = GasAmount;

    fn add(self, rhs: GasAmount) -> GasAmount {
        GasAmount(self.0 + rhs.0)
    }
}

impl AddAssign<&GasAmount> for GasAmount {
    fn add_assign(&mut self, rhs: &GasAmount) {
        self.0 += &rhs.0;
    }
}

impl<'a> Sum<&'a GasAmount> for GasAmount {
    fn sum<I: Iterator<Item = &'a GasAmount>>(iter: I) -> Self {
        iter.fold(GasAmount::zero(), |mut acc, g| {
            acc += g;
            acc
        })
    }
}

impl Serialize for GasAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

struct GasAmountVisitor;

impl<'de> Visitor<'de> for GasAmountVisitor {
    type Value = GasAmount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned decimal string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<GasAmount, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<GasAmount, E> {
        Ok(GasAmount::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<GasAmount, E> {
        u64::try_from(v)
            .map(GasAmount::from)
            .map_err(|_| E::custom(format!("negative gas quantity: {}", v)))
    }
}

impl<'de> Deserialize<'de> for GasAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(GasAmountVisitor)
    }
}

/// Add two decimal strings exactly
pub fn big_add(a: &str, b: &str) -> Result<String, GasParseError> {
    let sum = &a.parse::<GasAmount>()? + &b.parse::<GasAmount>()?;
    Ok(sum.to_decimal_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Schoolbook decimal addition, independent of num-bigint
    fn reference_add(a: &str, b: &str) -> String {
        let a: Vec<u8> = a.bytes().rev().map(|d| d - b'0').collect();
        let b: Vec<u8> = b.bytes().rev().map(|d| d - b'0').collect();
        let mut out = Vec::new();
        let mut carry = 0u8;
        for i in 0..a.len().max(b.len()) {
            let s = a.get(i).copied().unwrap_or(0) + b.get(i).copied().unwrap_or(0) + carry;
            out.push(b'0' + s % 10);
            carry = s / 10;
        }
        if carry > 0 {
            out.push(b'0' + carry);
        }
        while out.len() > 1 && out.last() == Some(&b'0') {
            out.pop();
        }
        out.reverse();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_big_add_small() {
        assert_eq!(big_add("0", "0").unwrap(), "0");
        assert_eq!(big_add("21000", "53000").unwrap(), "74000");
    }

    #[test]
    fn test_big_add_past_u64() {
        let max = u64::MAX.to_string();
        assert_eq!(big_add(&max, "1").unwrap(), "18446744073709551616");
        assert_eq!(
            big_add(
                "340282366920938463463374607431768211455",
                "340282366920938463463374607431768211455"
            )
            .unwrap(),
            "680564733841876926926749214863536422910"
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(big_add("", "1"), Err(GasParseError::Empty));
        assert!(big_add("-5", "1").is_err());
        assert!(big_add("1_000", "1").is_err());
        assert!(big_add("1.5", "1").is_err());
        assert!(big_add("+1", "1").is_err());
    }

    #[test]
    fn test_hex_quantity() {
        assert_eq!(GasAmount::from_hex_quantity("0x5208").unwrap(), GasAmount::from(21000u64));
        assert!(GasAmount::from_hex_quantity("0x").is_err());
        assert!(GasAmount::from_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn test_serde_decimal_string() {
        let gas: GasAmount = "123456789012345678901234567890".parse().unwrap();
        let json = serde_json::to_string(&gas).unwrap();
        assert_eq!(json, "\"123456789012345678901234567890\"");
        let back: GasAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, gas);
        let from_number: GasAmount = serde_json::from_str("42").unwrap();
        assert_eq!(from_number, GasAmount::from(42u64));
    }

    #[test]
    fn test_sum() {
        let values = vec![GasAmount::from(1u64), GasAmount::from(2u64), GasAmount::from(u64::MAX)];
        let total: GasAmount = values.iter().sum();
        assert_eq!(total.to_string(), "18446744073709551618");
    }

    proptest! {
        #[test]
        fn prop_big_add_matches_u128(a in any::<u64>(), b in any::<u64>()) {
            let expected = (a as u128 + b as u128).to_string();
            prop_assert_eq!(big_add(&a.to_string(), &b.to_string()).unwrap(), expected);
        }

        #[test]
        fn prop_big_add_matches_reference(a in "[1-9][0-9]{0,80}", b in "[1-9][0-9]{0,80}") {
            prop_assert_eq!(big_add(&a, &b).unwrap(), reference_add(&a, &b));
        }

        #[test]
        fn prop_big_add_commutes(a in "[0-9]{1,60}", b in "[0-9]{1,60}") {
            prop_assert_eq!(big_add(&a, &b).unwrap(), big_add(&b, &a).unwrap());
        }
    }
}
