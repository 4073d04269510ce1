//! World-state layer: accounts, code and per-key storage with checkpoint/revert
//! and copy-on-fork semantics.

pub mod account;
pub mod snapshot;
pub mod source;
pub mod store;

use thiserror::Error;

pub use account::{Account, Address, AddressExt};
pub use snapshot::StateSnapshot;
pub use source::{RpcStateSource, StateSource};
pub use store::{StateBackend, WorldState};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("malformed account RLP: {0}")]
    Rlp(String),
    #[error("malformed world-state snapshot: {0}")]
    Snapshot(String),
    #[error("external state fetch failed: {0}")]
    Fetch(String),
}
