use std::path::PathBuf;

use log::info;
use tokio::sync::mpsc::UnboundedSender;

use super::error::FuzzError;
use super::fuzzer_utils::{write_testcasefile, write_violationfile};
use crate::replay::ReplayRecord;
use crate::runner::ContractInfo;

/// Receives findings and new testcases as the fuzzer produces them
pub trait FindingHandler: Send {
    /// Called once per violated oracle name
    fn on_violation(
        &mut self,
        contract: &ContractInfo,
        oracle: &str,
        record: &ReplayRecord,
    ) -> Result<(), FuzzError>;

    fn on_testcase(&mut self, contract: &ContractInfo, record: &ReplayRecord) -> Result<(), FuzzError>;
}

pub struct NoopHandler;

impl FindingHandler for NoopHandler {
    fn on_violation(&mut self, _: &ContractInfo, _: &str, _: &ReplayRecord) -> Result<(), FuzzError> {
        Ok(())
    }

    fn on_testcase(&mut self, _: &ContractInfo, _: &ReplayRecord) -> Result<(), FuzzError> {
        Ok(())
    }
}

/// Persists findings under `<workspace>/<contract>/violations` and testcases
/// under `<workspace>/<contract>/testcases`
pub struct DiskHandler {
    workspace: PathBuf,
    testcases: usize,
}

impl DiskHandler {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        DiskHandler {
            workspace: workspace.into(),
            testcases: 0,
        }
    }
}

impl FindingHandler for DiskHandler {
    fn on_violation(
        &mut self,
        contract: &ContractInfo,
        oracle: &str,
        record: &ReplayRecord,
    ) -> Result<(), FuzzError> {
        let dir = self.workspace.join(&contract.name).join("violations");
        let path = write_violationfile(&dir, oracle, record)?;
        info!("violation of {} written to {}", oracle, path.display());
        Ok(())
    }

    fn on_testcase(&mut self, contract: &ContractInfo, record: &ReplayRecord) -> Result<(), FuzzError> {
        let dir = self.workspace.join(&contract.name).join("testcases");
        write_testcasefile(&dir, self.testcases, record)?;
        self.testcases += 1;
        Ok(())
    }
}

/// A finding leaving the fuzzing thread
#[derive(Debug, Clone)]
pub struct Finding {
    pub contract: String,
    pub oracle: String,
    pub record: ReplayRecord,
}

/// Streams violations to an async consumer so the hot loop never does I/O
pub struct ChannelHandler {
    sender: UnboundedSender<Finding>,
}

impl ChannelHandler {
    pub fn new(sender: UnboundedSender<Finding>) -> Self {
        ChannelHandler { sender }
    }
}

impl FindingHandler for ChannelHandler {
    fn on_violation(
        &mut self,
        contract: &ContractInfo,
        oracle: &str,
        record: &ReplayRecord,
    ) -> Result<(), FuzzError> {
        // a closed receiver only means nobody is listening anymore
        let _ = self.sender.send(Finding {
            contract: contract.name.clone(),
            oracle: oracle.to_string(),
            record: record.clone(),
        });
        Ok(())
    }

    fn on_testcase(&mut self, _: &ContractInfo, _: &ReplayRecord) -> Result<(), FuzzError> {
        Ok(())
    }
}
