//! Arbitrary-precision amounts and their at-rest hex encoding.
//!
//! Token amounts, reward counters and stake balances are unbounded signed
//! integers. At rest they are written as `0x`-prefixed hex strings (`-0x…` for
//! negatives) so they survive JSON-based persistence without precision loss.

use num_bigint::{BigInt, Sign};
use num_traits::Num;

/// A signed, arbitrary-precision amount.
pub type Amount = BigInt;

/// Render an amount as `0x…` / `-0x…` hex.
pub fn to_hex(value: &Amount) -> String {
    let digits = value.magnitude().to_str_radix(16);
    match value.sign() {
        Sign::Minus => format!("-0x{digits}"),
        _ => format!("0x{digits}"),
    }
}

/// Parse an amount from `0x…` hex (optionally `-`-prefixed) or plain decimal.
pub fn parse(s: &str) -> Option<Amount> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some("") => return None,
        Some(hex) => BigInt::from_str_radix(hex, 16).ok()?,
        None if body.is_empty() => return None,
        None => BigInt::from_str_radix(body, 10).ok()?,
    };
    if magnitude.sign() == Sign::Minus {
        return None;
    }
    Some(if negative { -magnitude } else { magnitude })
}

/// `#[serde(with = "amount::hex")]` adapter.
pub mod hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid hex amount '{raw}'")))
    }
}
