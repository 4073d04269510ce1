use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use log::trace;

use super::account::{Account, Address, AddressExt};
use super::source::StateSource;
use super::StateError;

/// Ledger-state capability interface consumed by a `Runner`
pub trait StateBackend {
    /// Returns the account, creating a zero account on first reference
    fn get_account(&mut self, address: &Address) -> Account;
    fn put_account(&mut self, address: &Address, account: Account);
    fn get_code(&mut self, address: &Address) -> Result<Vec<u8>, StateError>;
    fn put_code(&mut self, address: &Address, code: Vec<u8>);
    /// Never-written keys read as the empty byte string
    fn get_storage(&mut self, address: &Address, key: &[u8]) -> Result<Vec<u8>, StateError>;
    fn put_storage(&mut self, address: &Address, key: &[u8], value: Vec<u8>);
    fn checkpoint(&mut self);
    fn commit(&mut self);
    fn revert(&mut self);
    fn clear_storage(&mut self, address: &Address);
    fn delete_account(&mut self, address: &Address);
    fn account_exists(&self, address: &Address) -> bool;
}

/// Per-address data: account record, code and storage slots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountData {
    pub account: Account,
    pub code: Vec<u8>,
    pub storage: BTreeMap<Vec<u8>, Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Image {
    pub(crate) known: BTreeSet<Address>,
    pub(crate) entries: BTreeMap<Address, AccountData>,
    pub(crate) dirty: BTreeSet<String>,
}

pub(crate) fn code_dirty_key(address: &Address) -> String {
    format!("{}_code", address.to_base64())
}

pub(crate) fn storage_dirty_key(address: &Address, key: &[u8]) -> String {
    format!("{}-{}", address.to_base64(), STANDARD.encode(key))
}

/// Address-indexed world state.
///
/// All sub-structures are owned, so `copy()` yields a store that shares
/// nothing mutable with its parent. When a `StateSource` is attached, code and
/// storage reads that are not in the dirty set are fetched once and cached.
pub struct WorldState {
    pub(crate) image: Image,
    checkpoints: Vec<Image>,
    source: Option<Arc<dyn StateSource>>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldState {
    /// Fully local store
    pub fn new() -> Self {
        WorldState {
            image: Image::default(),
            checkpoints: Vec::new(),
            source: None,
        }
    }

    /// Store backed lazily by an external data source
    pub fn with_source(source: Arc<dyn StateSource>) -> Self {
        WorldState {
            image: Image::default(),
            checkpoints: Vec::new(),
            source: Some(source),
        }
    }

    pub(crate) fn from_image(image: Image, source: Option<Arc<dyn StateSource>>) -> Self {
        WorldState {
            image,
            checkpoints: Vec::new(),
            source,
        }
    }

    pub fn source(&self) -> Option<Arc<dyn StateSource>> {
        self.source.clone()
    }

    /// Deep clone decoupled from the original. Pending checkpoints are not carried over.
    pub fn copy(&self) -> WorldState {
        WorldState {
            image: self.image.clone(),
            checkpoints: Vec::new(),
            source: self.source.clone(),
        }
    }

    pub fn known_addresses(&self) -> impl Iterator<Item = &Address> {
        self.image.known.iter()
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.image.dirty.contains(key)
    }

    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }

    /// True when both stores expose the same accounts, code, storage and dirty set
    pub fn same_contents(&self, other: &WorldState) -> bool {
        self.image == other.image
    }

    fn entry(&mut self, address: &Address) -> &mut AccountData {
        self.image.known.insert(*address);
        self.image.entries.entry(*address).or_default()
    }
}

impl StateBackend for WorldState {
    fn get_account(&mut self, address: &Address) -> Account {
        self.entry(address).account.clone()
    }

    fn put_account(&mut self, address: &Address, account: Account) {
        self.entry(address).account = account;
    }

    fn get_code(&mut self, address: &Address) -> Result<Vec<u8>, StateError> {
        if let Some(source) = self.source.clone() {
            let key = code_dirty_key(address);
            if !self.image.dirty.contains(&key) {
                trace!("fetching code of {}", address);
                let code = source.code(address)?;
                self.put_code(address, code.clone());
                return Ok(code);
            }
        }
        Ok(self
            .image
            .entries
            .get(address)
            .map(|data| data.code.clone())
            .unwrap_or_default())
    }

    fn put_code(&mut self, address: &Address, code: Vec<u8>) {
        self.image.dirty.insert(code_dirty_key(address));
        self.entry(address).code = code;
    }

    fn get_storage(&mut self, address: &Address, key: &[u8]) -> Result<Vec<u8>, StateError> {
        if let Some(source) = self.source.clone() {
            let dirty_key = storage_dirty_key(address, key);
            if !self.image.dirty.contains(&dirty_key) {
                trace!("fetching storage {} of {}", hex::encode(key), address);
                let value = source.storage(address, key)?;
                self.put_storage(address, key, value.clone());
                return Ok(value);
            }
        }
        Ok(self
            .image
            .entries
            .get(address)
            .and_then(|data| data.storage.get(key))
            .cloned()
            .unwrap_or_default())
    }

    fn put_storage(&mut self, address: &Address, key: &[u8], value: Vec<u8>) {
        self.image.dirty.insert(storage_dirty_key(address, key));
        self.entry(address).storage.insert(key.to_vec(), value);
    }

    fn checkpoint(&mut self) {
        self.checkpoints.push(self.image.clone());
    }

    fn commit(&mut self) {
        self.checkpoints.pop();
    }

    /// Restores the most recent checkpoint, which stays in place
    fn revert(&mut self) {
        if let Some(image) = self.checkpoints.last() {
            self.image = image.clone();
        }
    }

    fn clear_storage(&mut self, address: &Address) {
        if let Some(data) = self.image.entries.get_mut(address) {
            data.storage.clear();
        }
    }

    fn delete_account(&mut self, address: &Address) {
        self.image.entries.remove(address);
    }

    fn account_exists(&self, address: &Address) -> bool {
        self.image.known.contains(address)
    }
}
