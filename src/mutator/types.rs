use std::fmt::Display;

use super::AbiError;

/// Parametrized ABI type of a method argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiType {
    Uint(u16),
    Int(u16),
    Bool,
    Address,
    Tuple(Vec<AbiType>),
}

impl AbiType {
    /// Resolve a type string such as `uint8`, `int256` or `(uint8,(bool,address))`.
    /// Anything else is rejected.
    pub fn parse(type_str: &str) -> Result<AbiType, AbiError> {
        let s = type_str.trim();
        if let Some(inner) = s.strip_prefix('(') {
            let inner = inner
                .strip_suffix(')')
                .ok_or_else(|| AbiError::UnknownType(type_str.to_string()))?;
            if inner.trim().is_empty() {
                return Ok(AbiType::Tuple(vec![]));
            }
            let children = split_top_level(inner)
                .ok_or_else(|| AbiError::UnknownType(type_str.to_string()))?
                .into_iter()
                .map(AbiType::parse)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(AbiType::Tuple(children));
        }
        match s {
            "bool" => return Ok(AbiType::Bool),
            "address" => return Ok(AbiType::Address),
            "uint" => return Ok(AbiType::Uint(256)),
            "int" => return Ok(AbiType::Int(256)),
            _ => {}
        }
        if let Some(bits) = s.strip_prefix("uint") {
            return parse_bits(bits)
                .map(AbiType::Uint)
                .ok_or_else(|| AbiError::UnknownType(type_str.to_string()));
        }
        if let Some(bits) = s.strip_prefix("int") {
            return parse_bits(bits)
                .map(AbiType::Int)
                .ok_or_else(|| AbiError::UnknownType(type_str.to_string()));
        }
        Err(AbiError::UnknownType(type_str.to_string()))
    }

    /// Build a tuple type from ABI JSON `components`
    pub fn tuple_of(children: Vec<AbiType>) -> AbiType {
        AbiType::Tuple(children)
    }
}

fn parse_bits(bits: &str) -> Option<u16> {
    if bits.is_empty() || !bits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let bits: u16 = bits.parse().ok()?;
    (bits >= 8 && bits <= 256 && bits % 8 == 0).then_some(bits)
}

/// Split on commas that are not nested inside parentheses.
/// Returns `None` when the parentheses are unbalanced.
fn split_top_level(s: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(&s[start..]);
    Some(parts)
}

impl Display for AbiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbiType::Uint(bits) => write!(f, "uint{}", bits),
            AbiType::Int(bits) => write!(f, "int{}", bits),
            AbiType::Bool => write!(f, "bool"),
            AbiType::Address => write!(f, "address"),
            AbiType::Tuple(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}
