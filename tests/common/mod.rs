#![allow(dead_code)]

use std::collections::HashMap;

use gecko_fuzzer::{
    fuzzer::AbiTarget,
    json::json_parser::parse_abi,
    mutator::encode::selector,
};

/// Assembled bytecode with the offsets of its labels
pub struct Program {
    pub code: Vec<u8>,
    pub labels: HashMap<String, usize>,
}

fn opcode(mnemonic: &str) -> Option<u8> {
    let op = match mnemonic {
        "STOP" => 0x00,
        "ADD" => 0x01,
        "MUL" => 0x02,
        "SUB" => 0x03,
        "DIV" => 0x04,
        "LT" => 0x10,
        "GT" => 0x11,
        "EQ" => 0x14,
        "ISZERO" => 0x15,
        "AND" => 0x16,
        "OR" => 0x17,
        "NOT" => 0x19,
        "SHL" => 0x1b,
        "SHR" => 0x1c,
        "CALLER" => 0x33,
        "CALLDATALOAD" => 0x35,
        "CALLDATASIZE" => 0x36,
        "CODECOPY" => 0x39,
        "POP" => 0x50,
        "MLOAD" => 0x51,
        "MSTORE" => 0x52,
        "SLOAD" => 0x54,
        "SSTORE" => 0x55,
        "JUMP" => 0x56,
        "JUMPI" => 0x57,
        "GAS" => 0x5a,
        "JUMPDEST" => 0x5b,
        "PUSH0" => 0x5f,
        "CALL" => 0xf1,
        "RETURN" => 0xf3,
        "REVERT" => 0xfd,
        "INVALID" => 0xfe,
        _ => {
            let (prefix, n) = mnemonic.split_at(mnemonic.find(|c: char| c.is_ascii_digit())?);
            let n: u8 = n.parse().ok()?;
            match prefix {
                "PUSH" if (1..=32).contains(&n) => 0x5f + n,
                "DUP" if (1..=16).contains(&n) => 0x7f + n,
                "SWAP" if (1..=16).contains(&n) => 0x8f + n,
                _ => return None,
            }
        }
    };
    Some(op)
}

fn immediate(token: &str, size: usize) -> Vec<u8> {
    let digits = match token.strip_prefix("0x") {
        Some(hex_digits) => hex_digits.to_string(),
        None => format!("{:x}", token.parse::<u128>().expect("decimal immediate")),
    };
    let digits = if digits.len() % 2 == 1 { format!("0{}", digits) } else { digits };
    let bytes = hex::decode(digits).expect("hex immediate");
    assert!(bytes.len() <= size, "{} does not fit in {} bytes", token, size);
    let mut out = vec![0u8; size - bytes.len()];
    out.extend(bytes);
    out
}

/// Whitespace separated mnemonics. `name:` places a JUMPDEST, `@name` pushes
/// its offset with PUSH2, `PUSHn` takes the next token as immediate.
pub fn assemble(source: &str) -> Program {
    let mut code = Vec::new();
    let mut labels = HashMap::new();
    let mut fixups = Vec::new();
    let mut tokens = source.split_whitespace();
    while let Some(token) = tokens.next() {
        if let Some(label) = token.strip_suffix(':') {
            labels.insert(label.to_string(), code.len());
            code.push(0x5b);
        } else if let Some(label) = token.strip_prefix('@') {
            code.push(0x61);
            fixups.push((code.len(), label.to_string()));
            code.extend([0, 0]);
        } else {
            let op = opcode(token).unwrap_or_else(|| panic!("unknown mnemonic {}", token));
            code.push(op);
            if (0x60..=0x7f).contains(&op) {
                let value = tokens.next().expect("push immediate");
                code.extend(immediate(value, (op - 0x5f) as usize));
            }
        }
    }
    for (at, label) in fixups {
        let offset = *labels.get(&label).unwrap_or_else(|| panic!("unknown label {}", label));
        code[at] = (offset >> 8) as u8;
        code[at + 1] = offset as u8;
    }
    Program { code, labels }
}

/// Constructor running `setup` and returning `runtime` as the deployed code
pub fn init_code(setup: &[u8], runtime: &[u8]) -> Vec<u8> {
    let offset = setup.len() + 13;
    let len = runtime.len();
    let mut code = setup.to_vec();
    code.extend([0x61, (len >> 8) as u8, len as u8]);
    code.extend([0x61, (offset >> 8) as u8, offset as u8]);
    code.extend([0x5f, 0x39]);
    code.extend([0x61, (len >> 8) as u8, len as u8]);
    code.extend([0x5f, 0xf3]);
    code.extend_from_slice(runtime);
    code
}

pub fn sel(signature: &str) -> String {
    format!("0x{}", hex::encode(selector(signature)))
}

/// Runtime of a contract holding one word in slot 0. `setter(uint256)`
/// overwrites it, each oracle body leaves its boolean on the stack.
pub fn setter_runtime(setter: &str, oracles: &[(&str, &str)]) -> Program {
    let mut source = String::from("PUSH0 CALLDATALOAD PUSH1 0xe0 SHR\n");
    source += &format!(
        "DUP1 PUSH4 {} EQ @setter JUMPI\n",
        sel(&format!("{}(uint256)", setter))
    );
    for (name, _) in oracles {
        source += &format!("DUP1 PUSH4 {} EQ @{} JUMPI\n", sel(&format!("{}()", name)), name);
    }
    source += "PUSH0 PUSH0 REVERT\n";
    source += "setter: PUSH1 4 CALLDATALOAD PUSH0 SSTORE STOP\n";
    for (name, body) in oracles {
        source += &format!("{}: {} PUSH0 MSTORE PUSH1 32 PUSH0 RETURN\n", name, body);
    }
    assemble(&source)
}

pub fn setter_abi(setter: &str, oracles: &[&str]) -> String {
    let mut entries = vec![serde_json::json!({
        "type": "function",
        "name": setter,
        "inputs": [{"name": "v", "type": "uint256"}],
        "outputs": [],
        "stateMutability": "nonpayable"
    })];
    for name in oracles {
        entries.push(serde_json::json!({
            "type": "function",
            "name": name,
            "inputs": [],
            "outputs": [{"name": "", "type": "bool"}],
            "stateMutability": "view"
        }));
    }
    serde_json::Value::Array(entries).to_string()
}

/// Slot 0 starts at 1
pub fn setter_target(name: &str, setter: &str, oracles: &[(&str, &str)]) -> (AbiTarget, String) {
    let runtime = setter_runtime(setter, oracles);
    let setup = assemble("PUSH1 1 PUSH0 SSTORE").code;
    let names: Vec<&str> = oracles.iter().map(|(name, _)| *name).collect();
    let abi_json = setter_abi(setter, &names);
    let target = AbiTarget {
        name: name.to_string(),
        init_code: init_code(&setup, &runtime.code),
        abi: parse_abi(&abi_json).expect("fixture abi"),
    };
    (target, abi_json)
}

/// `echidna_never_zero` breaks once the balance is set to 0
pub fn wallet() -> (AbiTarget, String) {
    setter_target("Wallet", "setBalance", &[("echidna_never_zero", "PUSH0 SLOAD ISZERO")])
}

/// `getXSquaredOverflow` breaks once x * x no longer fits 24 bits
pub fn square() -> (AbiTarget, String) {
    let (mut target, abi_json) = setter_target(
        "Square",
        "setX",
        &[(
            "getXSquaredOverflow",
            "PUSH4 0x01000000 PUSH0 SLOAD DUP1 MUL LT ISZERO",
        )],
    );
    target.abi.promote_oracles(&["getXSquaredOverflow"]);
    (target, abi_json)
}

/// Its only oracle needs a value far above the default cap
pub fn safe() -> (AbiTarget, String) {
    setter_target(
        "Safe",
        "setValue",
        &[("echidna_unreachable", "PUSH4 0x00bc614e PUSH0 SLOAD EQ")],
    )
}
