use std::{collections::HashSet, sync::Arc, time::Duration};

use log::{error, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::mpsc::unbounded_channel;

use super::{
    join_fuzz,
    onboard::download_project,
    registry::{calculate_reward, oracle_id},
    spawn_fuzz, BlobStore, ProjectInfo, ProjectRegistry,
};
use crate::{
    fuzzer::{
        handler::{ChannelHandler, Finding},
        FuzzConfig, FuzzError, FuzzResult,
    },
    replay::FindingEnvelope,
    runner::Runner,
};

/// Random picks before concluding no project is active
const PICK_ATTEMPTS: usize = 10;

/// What one mining round produced
#[derive(Debug)]
pub struct MiningReport {
    pub project_id: u64,
    pub result: FuzzResult,
    /// Tokens minted for this round's findings
    pub minted: Vec<u64>,
}

pub struct Miner {
    registry: Arc<dyn ProjectRegistry>,
    blobs: Arc<dyn BlobStore>,
    runner: Arc<dyn Runner>,
    config: FuzzConfig,
    poll_interval: Duration,
    rng: StdRng,
    /// `project@oracle` pairs already submitted
    reported: HashSet<String>,
}

impl Miner {
    pub fn new(
        registry: Arc<dyn ProjectRegistry>,
        blobs: Arc<dyn BlobStore>,
        runner: Arc<dyn Runner>,
        config: FuzzConfig,
        poll_interval: Duration,
    ) -> Self {
        Miner {
            rng: StdRng::seed_from_u64(config.seed),
            registry,
            blobs,
            runner,
            config,
            poll_interval,
            reported: HashSet::new(),
        }
    }

    /// Mine forever, or for `rounds` rounds. Round failures are logged and the loop goes on.
    pub async fn run(&mut self, rounds: Option<usize>) {
        let mut done = 0;
        while rounds.map_or(true, |rounds| done < rounds) {
            done += 1;
            match self.mine_once().await {
                Ok(Some(report)) => info!(
                    "project {}: {} | {} tokens minted",
                    report.project_id,
                    report.result.stats,
                    report.minted.len()
                ),
                Ok(None) => {
                    info!("no active project, waiting for new projects");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    error!("mining round failed: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn pick_project(&mut self) -> Result<Option<(u64, ProjectInfo)>, FuzzError> {
        let count = self.registry.project_count().await?;
        if count == 0 {
            return Ok(None);
        }
        let mut projects = Vec::with_capacity(count as usize);
        for id in 0..count {
            projects.push(self.registry.project_info(id).await?);
        }
        for _ in 0..PICK_ATTEMPTS {
            let id = self.rng.gen_range(0..count);
            let info = &projects[id as usize];
            if info.is_active() {
                return Ok(Some((id, info.clone())));
            }
        }
        Ok(None)
    }

    /// Pick an active project, fuzz it and submit what it yields
    pub async fn mine_once(&mut self) -> Result<Option<MiningReport>, FuzzError> {
        let Some((project_id, info)) = self.pick_project().await? else {
            return Ok(None);
        };
        info!("selected project {}", project_id);
        let (target, testcases) =
            download_project(self.blobs.as_ref(), &info.ipfs_hash, &format!("project-{}", project_id)).await?;

        let mut config = self.config.clone();
        config.seed = self.rng.gen();
        let (sender, mut findings) = unbounded_channel();
        let handle = spawn_fuzz(
            target,
            testcases,
            config,
            self.runner.clone(),
            Box::new(ChannelHandler::new(sender)),
        );

        let mut minted = Vec::new();
        // the channel closes once the fuzzer is done
        while let Some(finding) = findings.recv().await {
            match self.submit(project_id, finding).await {
                Ok(Some(token)) => minted.push(token),
                Ok(None) => {}
                Err(e) => warn!("submission for project {} failed: {}", project_id, e),
            }
        }
        let result = join_fuzz(handle).await?;
        Ok(Some(MiningReport {
            project_id,
            result,
            minted,
        }))
    }

    async fn submit(&mut self, project_id: u64, finding: Finding) -> Result<Option<u64>, FuzzError> {
        let key = format!("{}@{}", project_id, finding.oracle);
        if !self.reported.insert(key) {
            return Ok(None);
        }
        info!("found violation of {} in project {}", finding.oracle, project_id);
        let envelope = FindingEnvelope::new(&finding.record, &finding.oracle)?;
        let cid = self.blobs.put(&serde_json::to_vec(&envelope)?).await?;
        let reward =
            calculate_reward(self.registry.as_ref(), self.blobs.as_ref(), project_id, &finding.oracle).await?;
        if reward == 0 {
            info!("no reward for oracle {}", finding.oracle);
            return Ok(None);
        }
        let token = self
            .registry
            .mint(project_id, &cid, reward, oracle_id(&finding.oracle))
            .await?;
        Ok(Some(token))
    }
}
