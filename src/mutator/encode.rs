use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{keccak256, I256, U256};
use num_bigint::{BigInt, BigUint, Sign};

use super::types::AbiType;
use super::value::AbiValue;

/// `name(type1,type2,...)`
pub fn signature(name: &str, inputs: &[AbiType]) -> String {
    let types: Vec<String> = inputs.iter().map(AbiType::to_string).collect();
    format!("{}({})", name, types.join(","))
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `value mod 2^256`
pub fn to_u256(value: &BigUint) -> U256 {
    let bytes = value.to_bytes_be();
    let take = bytes.len().min(32);
    U256::from_be_slice(&bytes[bytes.len() - take..])
}

/// Two's complement of `value` on 256 bits
pub fn to_i256(value: &BigInt) -> I256 {
    let raw = match value.sign() {
        Sign::Minus => {
            let modulus: BigInt = BigInt::from(1u8) << 256usize;
            to_u256((modulus + value).magnitude())
        }
        _ => to_u256(value.magnitude()),
    };
    I256::from_raw(raw)
}

fn to_sol(value: &AbiValue) -> DynSolValue {
    match value {
        AbiValue::Uint { bits, value, .. } => DynSolValue::Uint(to_u256(value), *bits as usize),
        AbiValue::Int { bits, value, .. } => DynSolValue::Int(to_i256(value), *bits as usize),
        AbiValue::Bool(b) => DynSolValue::Bool(*b),
        AbiValue::Address(a) => DynSolValue::Address(*a),
        AbiValue::Tuple(children) => DynSolValue::Tuple(children.iter().map(to_sol).collect()),
    }
}

/// ABI encoding of `args` as a parameter list
pub fn encode_args(args: &[AbiValue]) -> Vec<u8> {
    DynSolValue::Tuple(args.iter().map(to_sol).collect()).abi_encode_params()
}

pub fn encode_call(selector: [u8; 4], args: &[AbiValue]) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend(encode_args(args));
    out
}

/// True when the first return word is nonzero. Short return data decodes as false.
pub fn decode_bool(data: &[u8]) -> bool {
    data.len() >= 32 && !U256::from_be_slice(&data[..32]).is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn test_signature_with_tuple() {
        let inputs = vec![AbiType::parse("(uint8,uint8)").unwrap(), AbiType::Bool];
        assert_eq!(signature("f", &inputs), "f((uint8,uint8),bool)");
    }

    #[test]
    fn test_negative_int_word() {
        assert_eq!(to_i256(&BigInt::from(-1)), I256::MINUS_ONE);
        let word = to_i256(&BigInt::from(-2)).into_raw().to_be_bytes::<32>();
        assert_eq!(word[31], 0xfe);
        assert!(word[..31].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn test_wide_values_wrap() {
        let wide: BigUint = (BigUint::from(1u8) << 256usize) + BigUint::from(3u8);
        assert_eq!(to_u256(&wide), U256::from(3u8));
    }

    #[test]
    fn test_encode_call_layout() {
        let cap = BigUint::from(10000u32);
        let mut args = vec![AbiValue::new(&AbiType::parse("(uint8,uint8)").unwrap(), &cap)];
        args[0].deserialize(r#"{"v":[5,9],"objs":["{\"_max\":256,\"v\":5}","{\"_max\":256,\"v\":9}"]}"#)
            .unwrap();
        let data = encode_call([1, 2, 3, 4], &args);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(data[4 + 31], 5);
        assert_eq!(data[4 + 63], 9);
    }

    #[test]
    fn test_decode_bool() {
        let mut word = vec![0u8; 32];
        assert!(!decode_bool(&word));
        word[31] = 1;
        assert!(decode_bool(&word));
        assert!(!decode_bool(&[1]));
    }
}
