use log::debug;

use super::OracleRunner;
use crate::runner::{ContractInfo, Executor, TraceSink, TxResult};
use crate::state::{Address, StateBackend, StateError};

/// Name under which trace-detected transfers are reported
pub const TRANSFER_VIOLATION: &str = "transfer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Violation(String),
    /// Suspicious pattern on a reverted transaction, counted but never reported
    Potential(String),
}

/// Everything a detector may look at for one executed transaction
pub struct Detection<'a> {
    pub executor: &'a Executor,
    pub caller: Address,
    pub contract: &'a ContractInfo,
    pub tx: &'a TxResult,
}

/// Decides whether an executed transaction violates a property
pub trait ViolationDetector: Send + Sync {
    /// Whether the trace sink must record `transfer` calls
    fn watches_transfers(&self) -> bool {
        false
    }

    fn detect(
        &self,
        detection: &Detection<'_>,
        state: &mut dyn StateBackend,
        sink: &mut TraceSink,
    ) -> Result<Verdict, StateError>;
}

/// Boolean oracle methods compiled into the contract
pub struct OracleDetector;

impl ViolationDetector for OracleDetector {
    fn detect(
        &self,
        detection: &Detection<'_>,
        state: &mut dyn StateBackend,
        sink: &mut TraceSink,
    ) -> Result<Verdict, StateError> {
        if detection.tx.reverted {
            return Ok(Verdict::Clean);
        }
        let verdict = OracleRunner::new(detection.executor).run_oracles(
            detection.caller,
            state,
            detection.contract,
            sink,
        )?;
        Ok(match verdict.oracle_name {
            Some(name) if verdict.violated => Verdict::Violation(name),
            _ => Verdict::Clean,
        })
    }
}

/// Flags transactions that made a nonzero `transfer(address,uint256)` call
pub struct TransferDetector;

impl ViolationDetector for TransferDetector {
    fn watches_transfers(&self) -> bool {
        true
    }

    fn detect(
        &self,
        detection: &Detection<'_>,
        _state: &mut dyn StateBackend,
        sink: &mut TraceSink,
    ) -> Result<Verdict, StateError> {
        let Some(transfer) = sink.transfers().first() else {
            return Ok(Verdict::Clean);
        };
        debug!(
            "{} transfer of {} to {} via {}",
            if detection.tx.reverted { "reverted" } else { "committed" },
            transfer.amount,
            transfer.to,
            transfer.token
        );
        Ok(if detection.tx.reverted {
            Verdict::Potential(TRANSFER_VIOLATION.to_string())
        } else {
            Verdict::Violation(TRANSFER_VIOLATION.to_string())
        })
    }
}
