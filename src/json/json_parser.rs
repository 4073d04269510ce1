use serde_json::Value;

use crate::mutator::encode::{selector, signature};
use crate::mutator::{AbiError, AbiType};

/// Name prefixes marking a method as an oracle
pub const ORACLE_PREFIXES: [&str; 2] = ["echidna", "lightfuzz"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub inputs: Vec<AbiType>,
    /// Canonical `name(types)` string
    pub signature: String,
    pub selector: [u8; 4],
    pub state_mutability: String,
}

impl Method {
    pub fn new(name: &str, inputs: Vec<AbiType>) -> Method {
        let signature = signature(name, &inputs);
        Method {
            name: name.to_string(),
            selector: selector(&signature),
            signature,
            inputs,
            state_mutability: "nonpayable".to_string(),
        }
    }
}

/// Functions of a contract ABI split into fuzzable methods and oracles
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    pub methods: Vec<Method>,
    pub oracles: Vec<Method>,
}

impl ContractAbi {
    /// Treat the named methods as oracles whatever their prefix
    pub fn promote_oracles(&mut self, names: &[&str]) {
        let (promoted, methods): (Vec<Method>, Vec<Method>) = std::mem::take(&mut self.methods)
            .into_iter()
            .partition(|m: &Method| names.contains(&m.name.as_str()));
        self.methods = methods;
        self.oracles.extend(promoted);
    }
}

pub fn is_oracle(name: &str) -> bool {
    ORACLE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Resolve one ABI parameter, expanding `tuple` components recursively
fn get_type(param: &Value) -> Result<AbiType, AbiError> {
    let ty = param
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AbiError::InvalidAbi(format!("parameter without type: {}", param)))?;
    if ty == "tuple" {
        let components = param
            .get("components")
            .and_then(Value::as_array)
            .ok_or_else(|| AbiError::InvalidAbi("tuple without components".to_string()))?;
        let children = components
            .iter()
            .map(get_type)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(AbiType::tuple_of(children));
    }
    AbiType::parse(ty)
}

fn extract_method(entry: &serde_json::Map<String, Value>) -> Result<Method, AbiError> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| AbiError::InvalidAbi("function without name".to_string()))?;
    let inputs = match entry.get("inputs").and_then(Value::as_array) {
        Some(inputs) => inputs.iter().map(get_type).collect::<Result<Vec<_>, _>>()?,
        None => vec![],
    };
    let mut method = Method::new(name, inputs);
    if let Some(mutability) = entry.get("stateMutability").and_then(Value::as_str) {
        method.state_mutability = mutability.to_string();
    }
    Ok(method)
}

/// Parse a contract ABI, either a bare array or an artifact with an `abi` field.
/// Only `function` entries are kept. Oracles never reach the fuzzable method list.
pub fn parse_abi(data: &str) -> Result<ContractAbi, AbiError> {
    let data: Value = serde_json::from_str(data)?;
    let entries = match &data {
        Value::Array(entries) => entries,
        Value::Object(obj) => obj
            .get("abi")
            .and_then(Value::as_array)
            .ok_or_else(|| AbiError::InvalidAbi("no `abi` array".to_string()))?,
        _ => return Err(AbiError::InvalidAbi("expected an array".to_string())),
    };

    let mut abi = ContractAbi::default();
    for entry in entries {
        let Some(entry) = entry.as_object() else {
            continue;
        };
        if entry.get("type").and_then(Value::as_str) != Some("function") {
            continue;
        }
        let method = extract_method(entry)?;
        if is_oracle(&method.name) {
            abi.oracles.push(method);
        } else {
            abi.methods.push(method);
        }
    }
    Ok(abi)
}
