use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::account::{Account, Address, AddressExt};
use super::source::StateSource;
use super::store::{AccountData, Image, WorldState};
use super::StateError;

/// Serialized form of one address' data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// base64 of the RLP encoded account
    pub account: String,
    /// base64 code
    pub code: String,
    /// base64 key -> base64 value
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
}

/// World-State JSON: `{knownAddress, storage, dirty}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// hex encoded addresses
    #[serde(rename = "knownAddress", default)]
    pub known_address: Vec<String>,
    /// keyed by base64 address
    #[serde(default)]
    pub storage: BTreeMap<String, AccountSnapshot>,
    #[serde(default)]
    pub dirty: Vec<String>,
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, StateError> {
    STANDARD
        .decode(value)
        .map_err(|e| StateError::Snapshot(format!("{} is not base64: {}", field, e)))
}

impl WorldState {
    pub fn to_snapshot(&self) -> StateSnapshot {
        let storage = self
            .image
            .entries
            .iter()
            .map(|(address, data)| {
                let slots = data
                    .storage
                    .iter()
                    .map(|(k, v)| (STANDARD.encode(k), STANDARD.encode(v)))
                    .collect();
                (
                    address.to_base64(),
                    AccountSnapshot {
                        account: data.account.to_base64(),
                        code: STANDARD.encode(&data.code),
                        storage: slots,
                    },
                )
            })
            .collect();
        StateSnapshot {
            known_address: self
                .image
                .known
                .iter()
                .map(|address| hex::encode(address.as_slice()))
                .collect(),
            storage,
            dirty: self.image.dirty.iter().cloned().collect(),
        }
    }

    pub fn from_snapshot(
        snapshot: &StateSnapshot,
        source: Option<Arc<dyn StateSource>>,
    ) -> Result<WorldState, StateError> {
        let mut image = Image::default();
        for address in &snapshot.known_address {
            image.known.insert(Address::parse_hex(address)?);
        }
        for (address, data) in &snapshot.storage {
            let address = Address::from_base64(address)?;
            let mut slots = BTreeMap::new();
            for (k, v) in &data.storage {
                slots.insert(decode_b64("storage key", k)?, decode_b64("storage value", v)?);
            }
            // every address holding data is known
            image.known.insert(address);
            image.entries.insert(
                address,
                AccountData {
                    account: Account::from_base64(&data.account)?,
                    code: decode_b64("code", &data.code)?,
                    storage: slots,
                },
            );
        }
        image.dirty = snapshot.dirty.iter().cloned().collect();
        Ok(WorldState::from_image(image, source))
    }
}
