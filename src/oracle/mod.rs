//! Oracle calls and the violation detectors the fuzzer is parameterized with.

pub mod detector;

use log::trace;

use crate::mutator::encode::decode_bool;
use crate::runner::{ContractInfo, Executor, TraceSink};
use crate::state::{Address, StateBackend, StateError};

pub use detector::{
    Detection, OracleDetector, TransferDetector, Verdict, ViolationDetector, TRANSFER_VIOLATION,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OracleVerdict {
    pub violated: bool,
    pub oracle_name: Option<String>,
}

/// Evaluates a contract's oracle methods against the current state
pub struct OracleRunner<'a> {
    executor: &'a Executor,
}

impl<'a> OracleRunner<'a> {
    pub fn new(executor: &'a Executor) -> Self {
        OracleRunner { executor }
    }

    /// Call every oracle in declaration order with no arguments. The first one
    /// returning `true` wins and later oracles are not evaluated. Oracle calls
    /// never leave state changes behind. Their steps are appended to `sink`.
    pub fn run_oracles(
        &self,
        caller: Address,
        state: &mut dyn StateBackend,
        contract: &ContractInfo,
        sink: &mut TraceSink,
    ) -> Result<OracleVerdict, StateError> {
        for oracle in &contract.oracles {
            state.checkpoint();
            let result = self.executor.run_transaction(
                caller,
                contract.address,
                &oracle.selector,
                state,
                sink,
            );
            state.revert();
            state.commit();
            let result = result?;

            // an exception reads as "not violated"
            let violated = !result.reverted && decode_bool(&result.return_data);
            trace!("oracle {} -> {}", oracle.name, violated);
            if violated {
                return Ok(OracleVerdict {
                    violated: true,
                    oracle_name: Some(oracle.name.clone()),
                });
            }
        }
        Ok(OracleVerdict::default())
    }
}
