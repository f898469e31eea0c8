//! Native amounts: unsigned integers in an asset's smallest denomination.
//!
//! Wallet-core speaks amounts as decimal strings, so `NativeAmount`
//! serializes as a string and accepts either a string or an integer when
//! deserializing.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeAmount(pub u128);

impl NativeAmount {
    pub const ZERO: NativeAmount = NativeAmount(0);

    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: NativeAmount) -> NativeAmount {
        NativeAmount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: NativeAmount) -> NativeAmount {
        NativeAmount(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u128) -> NativeAmount {
        NativeAmount(self.0.saturating_mul(factor))
    }

    pub fn checked_sub(self, other: NativeAmount) -> Option<NativeAmount> {
        self.0.checked_sub(other.0).map(NativeAmount)
    }
}

impl From<u128> for NativeAmount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NativeAmount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(NativeAmount)
    }
}

impl Serialize for NativeAmount {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NativeAmount {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = NativeAmount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<NativeAmount, E> {
                v.parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NativeAmount, E> {
                Ok(NativeAmount(u128::from(v)))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<NativeAmount, E> {
                Ok(NativeAmount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<NativeAmount, E> {
                u128::try_from(v)
                    .map(NativeAmount)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        d.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&NativeAmount(1_000_000_000_000_000_000)).unwrap();
        assert_eq!(json, "\"1000000000000000000\"");
    }

    #[test]
    fn accepts_strings_and_integers() {
        let a: NativeAmount = serde_json::from_str("\"42\"").unwrap();
        let b: NativeAmount = serde_json::from_str("42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<NativeAmount>("-1").is_err());
        assert!(serde_json::from_str::<NativeAmount>("\"1.5\"").is_err());
    }

    #[test]
    fn subtraction_saturates_at_zero() {
        assert_eq!(NativeAmount(3).saturating_sub(NativeAmount(10)), NativeAmount::ZERO);
        assert_eq!(NativeAmount(3).checked_sub(NativeAmount(10)), None);
    }
}
