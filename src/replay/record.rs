use serde::{Deserialize, Serialize};

use crate::fuzzer::error::FuzzError;
use crate::state::{Address, AddressExt, StateSnapshot};

/// One transaction with everything needed to re-execute it exactly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub method: String,
    /// Serialized argument nodes
    pub args: Vec<String>,
    /// World state the transaction ran against
    pub sm: StateSnapshot,
    /// base64 caller address
    pub caller: String,
    /// Contract index in the session
    pub idx: usize,
    /// hex calldata, set for inputs without an ABI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ReplayRecord {
    pub fn to_json(&self) -> Result<String, FuzzError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<ReplayRecord, FuzzError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn caller_address(&self) -> Result<Address, FuzzError> {
        Ok(Address::from_base64(&self.caller)?)
    }

    pub fn raw_calldata(&self) -> Result<Option<Vec<u8>>, FuzzError> {
        self.data
            .as_deref()
            .map(|data| {
                hex::decode(data.strip_prefix("0x").unwrap_or(data))
                    .map_err(|e| FuzzError::Record(format!("calldata is not hex: {}", e)))
            })
            .transpose()
    }
}

/// Wire format of a reported finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingEnvelope {
    /// `ReplayRecord` JSON
    pub txn: String,
    pub oracle_name: String,
}

impl FindingEnvelope {
    pub fn new(record: &ReplayRecord, oracle_name: &str) -> Result<Self, FuzzError> {
        Ok(FindingEnvelope {
            txn: record.to_json()?,
            oracle_name: oracle_name.to_string(),
        })
    }

    pub fn record(&self) -> Result<ReplayRecord, FuzzError> {
        ReplayRecord::from_json(&self.txn)
    }
}

/// Project bundle uploaded at onboarding: ABI, bytecode and testcases.
/// Stored as the hex encoding of its JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBundle {
    /// hex ABI JSON
    pub a: String,
    /// hex init code
    pub b: String,
    /// `ReplayRecord` JSON strings
    #[serde(default)]
    pub t: Vec<String>,
}

impl ProjectBundle {
    pub fn new(abi_json: &str, init_code: &[u8], testcases: Vec<String>) -> Self {
        ProjectBundle {
            a: hex::encode(abi_json.as_bytes()),
            b: hex::encode(init_code),
            t: testcases,
        }
    }

    pub fn to_hex(&self) -> Result<String, FuzzError> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    pub fn from_hex(data: &str) -> Result<Self, FuzzError> {
        let raw = hex::decode(data.trim())
            .map_err(|e| FuzzError::Bundle(format!("not hex: {}", e)))?;
        serde_json::from_slice(&raw).map_err(|e| FuzzError::Bundle(e.to_string()))
    }

    pub fn abi(&self) -> Result<String, FuzzError> {
        let raw = hex::decode(&self.a).map_err(|e| FuzzError::Bundle(format!("abi: {}", e)))?;
        String::from_utf8(raw).map_err(|e| FuzzError::Bundle(format!("abi: {}", e)))
    }

    pub fn init_code(&self) -> Result<Vec<u8>, FuzzError> {
        let raw = self.b.trim().strip_prefix("0x").unwrap_or(self.b.trim());
        hex::decode(raw).map_err(|e| FuzzError::Bundle(format!("bin: {}", e)))
    }

    pub fn testcases(&self) -> Result<Vec<ReplayRecord>, FuzzError> {
        self.t.iter().map(|t| ReplayRecord::from_json(t)).collect()
    }
}
