use thiserror::Error;

use crate::mutator::AbiError;
use crate::network::NetworkError;
use crate::runner::VmError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum FuzzError {
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("contract `{0}` failed to deploy: {1}")]
    Deploy(String, VmError),
    #[error("method `{0}` is ambiguous ({1} overloads), cannot pick a replay target")]
    AmbiguousMethod(String, usize),
    #[error("contract has no method `{0}`")]
    UnknownMethod(String),
    #[error("no contract with index {0}")]
    UnknownContract(usize),
    #[error("invalid project bundle: {0}")]
    Bundle(String),
    #[error("invalid replay record: {0}")]
    Record(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("oracles violated, fix them before onboarding: {0:?}")]
    Rejected(Vec<String>),
    #[error("fuzzing task failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
