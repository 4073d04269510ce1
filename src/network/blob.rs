use std::{collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::NetworkError;
use alloy_primitives::keccak256;

/// Content-addressed blob storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its content id
    async fn put(&self, data: &[u8]) -> Result<String, NetworkError>;

    async fn get(&self, cid: &str) -> Result<Vec<u8>, NetworkError>;
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    success: i64,
    #[serde(default)]
    cid: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    success: i64,
    #[serde(default)]
    data: String,
}

/// HTTP gateway in front of an IPFS node.
/// `POST /` answers `{success, cid}` and `GET /<cid>` answers `{success, data}`.
pub struct GatewayBlobStore {
    client: reqwest::Client,
    url: String,
}

impl GatewayBlobStore {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(GatewayBlobStore {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<String, NetworkError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

fn parse_put(body: &str) -> Result<String, NetworkError> {
    let response: PutResponse =
        serde_json::from_str(body).map_err(|e| NetworkError::Malformed(e.to_string()))?;
    if response.success != 1 || response.cid.is_empty() {
        return Err(NetworkError::Gateway("upload".to_string()));
    }
    Ok(response.cid)
}

fn parse_get(cid: &str, body: &str) -> Result<Vec<u8>, NetworkError> {
    let response: GetResponse =
        serde_json::from_str(body).map_err(|e| NetworkError::Malformed(e.to_string()))?;
    if response.success != 1 {
        return Err(NetworkError::Gateway(cid.to_string()));
    }
    Ok(response.data.into_bytes())
}

#[async_trait]
impl BlobStore for GatewayBlobStore {
    async fn put(&self, data: &[u8]) -> Result<String, NetworkError> {
        let url = format!("{}/", self.url);
        let request = self.client.post(&url).body(data.to_vec());
        let cid = parse_put(&self.send(request, &url).await?)?;
        debug!("uploaded {} bytes as {}", data.len(), cid);
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>, NetworkError> {
        let url = format!("{}/{}", self.url, cid);
        let request = self.client.get(&url);
        parse_get(cid, &self.send(request, &url).await?)
    }
}

/// In-process store keyed by the keccak256 hex digest of the content
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8]) -> Result<String, NetworkError> {
        let cid = hex::encode(keccak256(data));
        self.blobs
            .lock()
            .map_err(|_| NetworkError::Gateway(cid.clone()))?
            .insert(cid.clone(), data.to_vec());
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>, NetworkError> {
        self.blobs
            .lock()
            .map_err(|_| NetworkError::Gateway(cid.to_string()))?
            .get(cid)
            .cloned()
            .ok_or_else(|| NetworkError::Gateway(cid.to_string()))
    }
}
