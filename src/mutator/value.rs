use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::AbiType;
use super::{num, AbiError};
use crate::state::{Address, AddressExt};

/// Low addresses handed out by the address mutator. Address 1 is the deployer.
const ADDRESS_POOL: u64 = 5;

/// A typed argument node. Every variant owns its value, tuples own their children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    /// Value in `[0, max)` where `max = min(cap, 2^bits)`
    Uint { bits: u16, value: BigUint, max: BigUint },
    /// Value in `[min, max]` where `min = -2^(bits-1)` and `max = 2^(bits-1) - 1`
    Int {
        bits: u16,
        value: BigInt,
        min: BigInt,
        max: BigInt,
    },
    Bool(bool),
    Address(Address),
    Tuple(Vec<AbiValue>),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct UintRepr {
    #[serde(rename = "_max", with = "num::biguint")]
    max: BigUint,
    #[serde(with = "num::biguint")]
    v: BigUint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bits: Option<u16>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntRepr {
    #[serde(rename = "_min", with = "num::bigint")]
    min: BigInt,
    #[serde(rename = "_max", with = "num::bigint")]
    max: BigInt,
    #[serde(with = "num::bigint")]
    v: BigInt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bits: Option<u16>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BoolRepr {
    v: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddressRepr {
    v: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TupleRepr {
    #[serde(default)]
    v: Vec<Value>,
    objs: Vec<String>,
}

impl AbiValue {
    /// Zero-valued node for `ty`; unsigned domains are capped at `uint_cap`
    pub fn new(ty: &AbiType, uint_cap: &BigUint) -> AbiValue {
        match ty {
            AbiType::Uint(bits) => {
                let full = BigUint::one() << *bits as usize;
                AbiValue::Uint {
                    bits: *bits,
                    value: BigUint::zero(),
                    max: uint_cap.min(&full).clone(),
                }
            }
            AbiType::Int(bits) => {
                let half = BigInt::one() << (*bits as usize - 1);
                AbiValue::Int {
                    bits: *bits,
                    value: BigInt::zero(),
                    min: -half.clone(),
                    max: half - BigInt::one(),
                }
            }
            AbiType::Bool => AbiValue::Bool(false),
            AbiType::Address => AbiValue::Address(Address::from_low_u64(1)),
            AbiType::Tuple(children) => AbiValue::Tuple(
                children
                    .iter()
                    .map(|child| AbiValue::new(child, uint_cap))
                    .collect(),
            ),
        }
    }

    pub fn abi_type(&self) -> AbiType {
        match self {
            AbiValue::Uint { bits, .. } => AbiType::Uint(*bits),
            AbiValue::Int { bits, .. } => AbiType::Int(*bits),
            AbiValue::Bool(_) => AbiType::Bool,
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Tuple(children) => {
                AbiType::Tuple(children.iter().map(AbiValue::abi_type).collect())
            }
        }
    }

    /// Perturb this node in place.
    /// Terminals draw a fresh uniform value from their domain. A tuple mutates
    /// exactly one uniformly chosen child, so a field changes with probability `1 / n`.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self {
            AbiValue::Uint { value, max, .. } => {
                *value = if max.is_zero() {
                    BigUint::zero()
                } else {
                    rng.gen_biguint_below(max)
                };
            }
            AbiValue::Int {
                value, min, max, ..
            } => {
                *value = rng.gen_bigint_range(min, &(max.clone() + BigInt::one()));
            }
            AbiValue::Bool(value) => *value = rng.gen(),
            AbiValue::Address(value) => {
                *value = Address::from_low_u64(rng.gen_range(0..ADDRESS_POOL));
            }
            AbiValue::Tuple(children) => {
                if children.is_empty() {
                    return;
                }
                let idx = rng.gen_range(0..children.len());
                children[idx].mutate(rng);
            }
        }
    }

    /// Plain JSON view of the current value
    pub fn to_json(&self) -> Value {
        match self {
            AbiValue::Uint { value, .. } => big_to_json(value.to_string(), value.bits() <= 53),
            AbiValue::Int { value, .. } => big_to_json(value.to_string(), value.bits() <= 53),
            AbiValue::Bool(value) => Value::Bool(*value),
            AbiValue::Address(value) => Value::String(value.to_string()),
            AbiValue::Tuple(children) => Value::Array(children.iter().map(AbiValue::to_json).collect()),
        }
    }

    /// Canonical string form; stores the domain parameters along with the value
    pub fn serialize(&self) -> String {
        let repr = match self {
            AbiValue::Uint { bits, value, max } => serde_json::to_string(&UintRepr {
                max: max.clone(),
                v: value.clone(),
                bits: Some(*bits),
            }),
            AbiValue::Int {
                bits,
                value,
                min,
                max,
            } => serde_json::to_string(&IntRepr {
                min: min.clone(),
                max: max.clone(),
                v: value.clone(),
                bits: Some(*bits),
            }),
            AbiValue::Bool(value) => serde_json::to_string(&BoolRepr { v: *value }),
            AbiValue::Address(value) => serde_json::to_string(&AddressRepr {
                v: value.to_string(),
            }),
            AbiValue::Tuple(children) => serde_json::to_string(&TupleRepr {
                v: children.iter().map(AbiValue::to_json).collect(),
                objs: children.iter().map(AbiValue::serialize).collect(),
            }),
        };
        // the repr structs only hold strings, numbers and bools
        repr.unwrap_or_default()
    }

    /// Restore value and domain from `serialize()` output. The string must have
    /// the same shape as this node.
    pub fn deserialize(&mut self, s: &str) -> Result<(), AbiError> {
        let expected = self.abi_type().to_string();
        let shape = |reason: String| AbiError::Shape {
            expected: expected.clone(),
            reason,
        };
        match self {
            AbiValue::Uint { bits, value, max } => {
                let repr: UintRepr = serde_json::from_str(s)?;
                if let Some(b) = repr.bits {
                    if b != *bits {
                        return Err(shape(format!("bit width {}", b)));
                    }
                }
                // a domain wider than the declared type is cut back to it
                let full = BigUint::one() << *bits as usize;
                let domain = repr.max.min(full);
                if domain.is_zero() && !repr.v.is_zero() || !domain.is_zero() && repr.v >= domain {
                    return Err(shape(format!("{} outside [0, {})", repr.v, domain)));
                }
                *value = repr.v;
                *max = domain;
            }
            AbiValue::Int {
                bits,
                value,
                min,
                max,
            } => {
                let repr: IntRepr = serde_json::from_str(s)?;
                if let Some(b) = repr.bits {
                    if b != *bits {
                        return Err(shape(format!("bit width {}", b)));
                    }
                }
                if repr.v < repr.min || repr.v > repr.max {
                    return Err(shape(format!(
                        "{} outside [{}, {}]",
                        repr.v, repr.min, repr.max
                    )));
                }
                *value = repr.v;
                *min = repr.min;
                *max = repr.max;
            }
            AbiValue::Bool(value) => {
                let repr: BoolRepr = serde_json::from_str(s)?;
                *value = repr.v;
            }
            AbiValue::Address(value) => {
                let repr: AddressRepr = serde_json::from_str(s)?;
                *value = Address::parse_hex(&repr.v).map_err(|e| shape(e.to_string()))?;
            }
            AbiValue::Tuple(children) => {
                let repr: TupleRepr = serde_json::from_str(s)?;
                if repr.objs.len() != children.len() {
                    return Err(shape(format!("{} children", repr.objs.len())));
                }
                for (child, obj) in children.iter_mut().zip(repr.objs.iter()) {
                    child.deserialize(obj)?;
                }
            }
        }
        Ok(())
    }
}

fn big_to_json(decimal: String, fits: bool) -> Value {
    if fits {
        if let Ok(n) = decimal.parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::String(decimal)
}

/// Perturb exactly one randomly chosen top-level argument
pub fn mutate_args<R: Rng + ?Sized>(args: &mut [AbiValue], rng: &mut R) {
    if args.is_empty() {
        return;
    }
    let idx = rng.gen_range(0..args.len());
    args[idx].mutate(rng);
}
