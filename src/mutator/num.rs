//! serde helpers writing big integers as JSON numbers when they fit in 64 bits
//! and as decimal strings otherwise. Reading accepts numbers, integral floats
//! and decimal or `0x` strings.

use num_bigint::{BigInt, BigUint};
use num_traits::{FromPrimitive, Num, ToPrimitive};
use serde::{de::Error, Deserialize, Deserializer, Serializer};
use serde_json::Value;

fn parse_bigint(value: &Value) -> Result<BigInt, String> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(BigInt::from(v))
            } else if let Some(v) = n.as_u64() {
                Ok(BigInt::from(v))
            } else {
                let f = n.as_f64().ok_or_else(|| format!("unsupported number {}", n))?;
                if f.fract() != 0.0 {
                    return Err(format!("{} is not an integer", f));
                }
                BigInt::from_f64(f).ok_or_else(|| format!("unsupported number {}", f))
            }
        }
        Value::String(s) => {
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s.as_str()),
            };
            let parsed = match digits.strip_prefix("0x") {
                Some(hex) => BigInt::from_str_radix(hex, 16),
                None => BigInt::from_str_radix(digits, 10),
            }
            .map_err(|e| format!("`{}`: {}", s, e))?;
            Ok(if negative { -parsed } else { parsed })
        }
        other => Err(format!("expected a number, found {}", other)),
    }
}

pub mod biguint {
    use super::*;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        match value.to_u64() {
            Some(v) => serializer.serialize_u64(v),
            None => serializer.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_bigint(&value)
            .map_err(D::Error::custom)?
            .to_biguint()
            .ok_or_else(|| D::Error::custom("negative value for an unsigned integer"))
    }
}

pub mod bigint {
    use super::*;

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        match value.to_i64() {
            Some(v) => serializer.serialize_i64(v),
            None => serializer.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_bigint(&value).map_err(D::Error::custom)
    }
}
