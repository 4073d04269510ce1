//! Online side of the fuzzer: content-addressed storage, the reward registry,
//! and the onboarding, miner and validator flows built on top of them.

pub mod blob;
pub mod miner;
pub mod onboard;
pub mod registry;
pub mod validator;

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    fuzzer::{handler::FindingHandler, AbiTarget, FuzzConfig, FuzzError, FuzzResult, Fuzzer},
    oracle::OracleDetector,
    replay::ReplayRecord,
    runner::Runner,
    state::WorldState,
};

pub use blob::{BlobStore, GatewayBlobStore, MemoryBlobStore};
pub use registry::{compute_reward, oracle_id, JsonRegistry, MintEvent, ProjectInfo, ProjectRegistry, Vote};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("gateway rejected the request for {0}")]
    Gateway(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("registry: {0}")]
    Registry(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fuzz `target` on the blocking pool so async I/O keeps running beside the hot loop
pub(crate) fn spawn_fuzz(
    target: AbiTarget,
    testcases: Vec<ReplayRecord>,
    config: FuzzConfig,
    runner: Arc<dyn Runner>,
    mut handler: Box<dyn FindingHandler>,
) -> JoinHandle<Result<FuzzResult, FuzzError>> {
    tokio::task::spawn_blocking(move || {
        let mut fuzzer = Fuzzer::new(config, runner, Box::new(OracleDetector));
        fuzzer.setup(std::slice::from_ref(&target), WorldState::new())?;
        fuzzer.load_testcases(&testcases, handler.as_mut())?;
        fuzzer.run(handler.as_mut())
    })
}

pub(crate) async fn join_fuzz(
    handle: JoinHandle<Result<FuzzResult, FuzzError>>,
) -> Result<FuzzResult, FuzzError> {
    handle.await.map_err(|e| FuzzError::Worker(e.to_string()))?
}
