use std::future::IntoFuture;
use std::time::Duration;

use alloy::providers::{Provider, ReqwestProvider};
use alloy_primitives::U256;
use log::debug;
use tokio::runtime::{Builder, Runtime};

use super::account::Address;
use super::StateError;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only source of code and storage for addresses the local store has not written
pub trait StateSource: Send + Sync {
    fn code(&self, address: &Address) -> Result<Vec<u8>, StateError>;
    fn storage(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>, StateError>;
}

/// Node answering `eth_getCode` and `eth_getStorageAt` at `latest`.
///
/// Execution is synchronous, so the source drives its provider on a runtime
/// of its own. It must not be queried from inside another tokio runtime.
pub struct RpcStateSource {
    provider: ReqwestProvider,
    runtime: Runtime,
}

impl RpcStateSource {
    pub fn new(url: &str) -> Result<Self, StateError> {
        let endpoint = reqwest::Url::parse(url).map_err(|e| StateError::Fetch(format!("{}: {}", url, e)))?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| StateError::Fetch(e.to_string()))?;
        Ok(RpcStateSource {
            provider: ReqwestProvider::new_http(endpoint),
            runtime,
        })
    }

    fn block_on<F, T, E>(&self, method: &str, call: F) -> Result<T, StateError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.runtime.block_on(async move {
            match tokio::time::timeout(RPC_TIMEOUT, call.into_future()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(StateError::Fetch(format!("{}: {}", method, e))),
                Err(_) => Err(StateError::Fetch(format!("{}: timed out", method))),
            }
        })
    }
}

impl StateSource for RpcStateSource {
    fn code(&self, address: &Address) -> Result<Vec<u8>, StateError> {
        debug!("rpc eth_getCode {}", address);
        let code = self.block_on("eth_getCode", self.provider.get_code_at(*address))?;
        Ok(code.to_vec())
    }

    fn storage(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>, StateError> {
        debug!("rpc eth_getStorageAt {} 0x{}", address, hex::encode(key));
        let slot = U256::try_from_be_slice(key)
            .ok_or_else(|| StateError::Fetch(format!("storage key of {} bytes", key.len())))?;
        let word = self.block_on("eth_getStorageAt", self.provider.get_storage_at(*address, slot))?;
        // local stores keep values without leading zeros, an all-zero word reads as empty
        let bytes = word.to_be_bytes::<32>();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Ok(bytes[first..].to_vec())
    }
}
