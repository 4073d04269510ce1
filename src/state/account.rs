use alloy_primitives::{b256, B256, U256};
use revm::primitives::KECCAK_EMPTY as KECCAK256_EMPTY;
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};
use base64::{engine::general_purpose::STANDARD, Engine};

use super::StateError;

pub use alloy_primitives::Address;

/// Root of an empty storage trie
pub const EMPTY_STORAGE_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Hash of empty code
pub const EMPTY_CODE_HASH: B256 = KECCAK256_EMPTY;

/// Wire forms of addresses used by snapshots and records
pub trait AddressExt: Sized {
    /// Address whose low 8 bytes hold `value` in big endian
    fn from_low_u64(value: u64) -> Self;
    /// Parse a hex address, with or without the `0x` prefix
    fn parse_hex(s: &str) -> Result<Self, StateError>;
    fn from_base64(s: &str) -> Result<Self, StateError>;
    fn to_base64(&self) -> String;
}

impl AddressExt for Address {
    fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Address::from(bytes)
    }

    fn parse_hex(s: &str) -> Result<Self, StateError> {
        s.parse().map_err(|_| StateError::InvalidAddress(s.to_string()))
    }

    fn from_base64(s: &str) -> Result<Self, StateError> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|_| StateError::InvalidAddress(s.to_string()))?;
        if bytes.len() != 20 {
            return Err(StateError::InvalidAddress(s.to_string()));
        }
        Ok(Address::from_slice(&bytes))
    }

    fn to_base64(&self) -> String {
        STANDARD.encode(self.as_slice())
    }
}

/// Account record: nonce, balance, storage root marker and code hash marker.
/// RLP encodes as the list `[nonce, balance, storageRoot, codeHash]`.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: B256,
    pub code_hash: B256,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: EMPTY_STORAGE_ROOT,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

impl Account {
    pub fn to_rlp(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }

    pub fn from_rlp(data: &[u8]) -> Result<Self, StateError> {
        let mut buf = data;
        let account = Account::decode(&mut buf).map_err(|e| StateError::Rlp(e.to_string()))?;
        if !buf.is_empty() {
            return Err(StateError::Rlp("trailing bytes after account list".to_string()));
        }
        Ok(account)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_rlp())
    }

    pub fn from_base64(s: &str) -> Result<Self, StateError> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| StateError::Snapshot(format!("account is not base64: {}", e)))?;
        Self::from_rlp(&bytes)
    }
}
