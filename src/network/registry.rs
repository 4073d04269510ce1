use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{BlobStore, NetworkError};

/// 32-bit string hash identifying an oracle on chain
pub fn oracle_id(oracle_name: &str) -> u32 {
    let hash = oracle_name
        .encode_utf16()
        .fold(0i32, |hash, c| (hash << 5).wrapping_sub(hash).wrapping_add(c as i32));
    hash.unsigned_abs()
}

/// `splittings[oracle] * base_reward`, rounded down. Unknown oracles earn nothing.
pub fn compute_reward(splittings: &HashMap<String, f64>, oracle_name: &str, base_reward: u64) -> u64 {
    match splittings.get(oracle_name) {
        Some(split) if split.is_finite() && *split > 0.0 => (split * base_reward as f64).floor() as u64,
        _ => 0,
    }
}

/// Reward a finding on `oracle_name` would earn right now. Frozen oracles earn nothing.
pub async fn calculate_reward(
    registry: &dyn ProjectRegistry,
    blobs: &dyn BlobStore,
    project_id: u64,
    oracle_name: &str,
) -> Result<u64, NetworkError> {
    if registry.is_oracle_frozen(project_id, oracle_id(oracle_name)).await? {
        return Ok(0);
    }
    let info = registry.project_info(project_id).await?;
    let raw = blobs.get(&info.splittings_cid).await?;
    let splittings: HashMap<String, f64> =
        serde_json::from_slice(&raw).map_err(|e| NetworkError::Malformed(format!("splittings: {}", e)))?;
    Ok(compute_reward(&splittings, oracle_name, info.base_reward))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Content id of the project bundle
    pub ipfs_hash: String,
    pub base_reward: u64,
    /// Content id of the `{oracle: share}` reward split
    pub splittings_cid: String,
    /// 0 while the project accepts findings
    pub status: u8,
}

impl ProjectInfo {
    pub fn is_active(&self) -> bool {
        self.status == 0
    }
}

/// A finding minted by a miner, waiting for validator votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintEvent {
    pub token_id: u64,
    pub project_id: u64,
    pub oracle_id: u32,
    /// Content id of the finding envelope
    pub ipfs_hash: String,
    pub reward: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Aye,
    Nay,
}

/// Ledger of projects, minted findings and votes
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn project_count(&self) -> Result<u64, NetworkError>;

    async fn project_info(&self, project_id: u64) -> Result<ProjectInfo, NetworkError>;

    async fn is_oracle_frozen(&self, project_id: u64, oracle_id: u32) -> Result<bool, NetworkError>;

    /// Submit a finding for reward, returns the new token id
    async fn mint(&self, project_id: u64, cid: &str, reward: u64, oracle_id: u32) -> Result<u64, NetworkError>;

    /// Mint events with a token id above `after`, oldest first
    async fn mint_events(&self, after: u64) -> Result<Vec<MintEvent>, NetworkError>;

    async fn vote(&self, token_id: u64, vote: Vote) -> Result<(), NetworkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FrozenOracle {
    project_id: u64,
    oracle_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Ballot {
    token_id: u64,
    vote: Vote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    projects: Vec<ProjectInfo>,
    #[serde(default)]
    frozen: Vec<FrozenOracle>,
    #[serde(default)]
    mints: Vec<MintEvent>,
    #[serde(default)]
    votes: Vec<Ballot>,
}

/// Registry kept in a JSON file, for local networks and tests.
/// Every mutation is written back before returning.
pub struct JsonRegistry {
    path: Option<PathBuf>,
    data: Mutex<RegistryData>,
}

impl JsonRegistry {
    pub fn in_memory() -> Self {
        JsonRegistry {
            path: None,
            data: Mutex::new(RegistryData::default()),
        }
    }

    /// Open `path`, starting empty if it does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| NetworkError::Registry(format!("{}: {}", path.display(), e)))?
        } else {
            RegistryData::default()
        };
        Ok(JsonRegistry {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut RegistryData) -> Result<T, NetworkError>) -> Result<T, NetworkError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| NetworkError::Registry("registry lock poisoned".to_string()))?;
        f(&mut data)
    }

    fn update<T>(&self, f: impl FnOnce(&mut RegistryData) -> Result<T, NetworkError>) -> Result<T, NetworkError> {
        self.with_data(|data| {
            let result = f(data)?;
            if let Some(path) = &self.path {
                let content = serde_json::to_string_pretty(data)
                    .map_err(|e| NetworkError::Registry(e.to_string()))?;
                fs::write(path, content)?;
            }
            Ok(result)
        })
    }

    /// Register a project, returns its id
    pub fn add_project(&self, info: ProjectInfo) -> Result<u64, NetworkError> {
        self.update(|data| {
            data.projects.push(info);
            Ok(data.projects.len() as u64 - 1)
        })
    }

    pub fn freeze_oracle(&self, project_id: u64, oracle_name: &str) -> Result<(), NetworkError> {
        let frozen = FrozenOracle {
            project_id,
            oracle_id: oracle_id(oracle_name),
        };
        self.update(|data| {
            if !data.frozen.contains(&frozen) {
                data.frozen.push(frozen);
            }
            Ok(())
        })
    }

    pub fn votes(&self, token_id: u64) -> Result<Vec<Vote>, NetworkError> {
        self.with_data(|data| {
            Ok(data
                .votes
                .iter()
                .filter(|b| b.token_id == token_id)
                .map(|b| b.vote)
                .collect())
        })
    }
}

#[async_trait]
impl ProjectRegistry for JsonRegistry {
    async fn project_count(&self) -> Result<u64, NetworkError> {
        self.with_data(|data| Ok(data.projects.len() as u64))
    }

    async fn project_info(&self, project_id: u64) -> Result<ProjectInfo, NetworkError> {
        self.with_data(|data| {
            data.projects
                .get(project_id as usize)
                .cloned()
                .ok_or_else(|| NetworkError::Registry(format!("no project {}", project_id)))
        })
    }

    async fn is_oracle_frozen(&self, project_id: u64, oracle_id: u32) -> Result<bool, NetworkError> {
        let key = FrozenOracle { project_id, oracle_id };
        self.with_data(|data| Ok(data.frozen.contains(&key)))
    }

    async fn mint(&self, project_id: u64, cid: &str, reward: u64, oracle_id: u32) -> Result<u64, NetworkError> {
        let token_id = self.update(|data| {
            // token ids start at 1, 0 means "nothing seen yet"
            let token_id = data.mints.len() as u64 + 1;
            data.mints.push(MintEvent {
                token_id,
                project_id,
                oracle_id,
                ipfs_hash: cid.to_string(),
                reward,
            });
            Ok(token_id)
        })?;
        info!("minted token {} for project {} ({} reward)", token_id, project_id, reward);
        Ok(token_id)
    }

    async fn mint_events(&self, after: u64) -> Result<Vec<MintEvent>, NetworkError> {
        self.with_data(|data| Ok(data.mints.iter().filter(|m| m.token_id > after).cloned().collect()))
    }

    async fn vote(&self, token_id: u64, vote: Vote) -> Result<(), NetworkError> {
        debug!("vote {:?} on token {}", vote, token_id);
        self.update(|data| {
            data.votes.push(Ballot { token_id, vote });
            Ok(())
        })
    }
}
