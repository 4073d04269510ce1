use std::{collections::HashSet, sync::Arc, time::Duration};

use log::{error, info, warn};

use super::{
    onboard::download_project,
    registry::{calculate_reward, oracle_id},
    BlobStore, MintEvent, ProjectRegistry, Vote,
};
use crate::{
    fuzzer::{FuzzConfig, FuzzError},
    oracle::OracleDetector,
    replay::{FindingEnvelope, Replayer},
    runner::Runner,
    state::WorldState,
};

/// Replays minted findings and votes on them
pub struct Validator {
    registry: Arc<dyn ProjectRegistry>,
    blobs: Arc<dyn BlobStore>,
    runner: Arc<dyn Runner>,
    config: FuzzConfig,
    poll_interval: Duration,
    voted: HashSet<u64>,
    last_token: u64,
}

impl Validator {
    pub fn new(
        registry: Arc<dyn ProjectRegistry>,
        blobs: Arc<dyn BlobStore>,
        runner: Arc<dyn Runner>,
        config: FuzzConfig,
        poll_interval: Duration,
    ) -> Self {
        Validator {
            registry,
            blobs,
            runner,
            config,
            poll_interval,
            voted: HashSet::new(),
            last_token: 0,
        }
    }

    pub async fn run(&mut self, rounds: Option<usize>) {
        let mut done = 0;
        while rounds.map_or(true, |rounds| done < rounds) {
            done += 1;
            match self.validate_once().await {
                Ok(votes) if !votes.is_empty() => info!("cast {} votes", votes.len()),
                Ok(_) => {}
                Err(e) => error!("validation round failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Vote on every new mint event of a non-frozen oracle
    pub async fn validate_once(&mut self) -> Result<Vec<(u64, Vote)>, FuzzError> {
        let events = self.registry.mint_events(self.last_token).await?;
        let mut votes = Vec::new();
        for event in events {
            self.last_token = self.last_token.max(event.token_id);
            if self
                .registry
                .is_oracle_frozen(event.project_id, event.oracle_id)
                .await?
            {
                continue;
            }
            if !self.voted.insert(event.token_id) {
                info!("already voted on {}", event.token_id);
                continue;
            }
            let vote = match self.check(&event).await {
                Ok(vote) => vote,
                Err(FuzzError::Network(e)) => {
                    error!("cannot check token {}: {}", event.token_id, e);
                    continue;
                }
                Err(e) => {
                    warn!("token {} does not replay: {}", event.token_id, e);
                    Vote::Nay
                }
            };
            info!("vote {:?} on token {}", vote, event.token_id);
            self.registry.vote(event.token_id, vote).await?;
            votes.push((event.token_id, vote));
        }
        Ok(votes)
    }

    /// Replay the finding of `event` and compare it with what was claimed
    pub async fn check(&self, event: &MintEvent) -> Result<Vote, FuzzError> {
        let info = self.registry.project_info(event.project_id).await?;
        let (target, _) = download_project(
            self.blobs.as_ref(),
            &info.ipfs_hash,
            &format!("project-{}", event.project_id),
        )
        .await?;
        let raw = self.blobs.get(&event.ipfs_hash).await?;
        let envelope: FindingEnvelope = serde_json::from_slice(&raw)?;

        let runner = self.runner.clone();
        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut replayer = Replayer::new(&config, runner, Box::new(OracleDetector));
            replayer.deploy(std::slice::from_ref(&target), WorldState::new())?;
            replayer.rerun_envelope(&envelope)
        })
        .await
        .map_err(|e| FuzzError::Worker(e.to_string()))??;

        let Some(oracle) = outcome.oracle else {
            return Ok(Vote::Nay);
        };
        if oracle_id(&oracle) != event.oracle_id {
            return Ok(Vote::Nay);
        }
        let reward =
            calculate_reward(self.registry.as_ref(), self.blobs.as_ref(), event.project_id, &oracle).await?;
        if event.reward == 0 || event.reward != reward {
            return Ok(Vote::Nay);
        }
        Ok(Vote::Aye)
    }
}
