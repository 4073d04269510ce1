use std::sync::Arc;

use log::debug;

use super::runner::{CallContext, Runner, VmError};
use super::trace::TraceSink;
use crate::fuzzer::error::FuzzError;
use crate::json::json_parser::Method;
use crate::state::{Address, AddressExt, StateBackend, StateError};

/// Sender of deployments and default transaction caller
pub const DEPLOYER: u64 = 1;
/// Deployed contracts live above the low caller addresses
const DEPLOY_BASE: u64 = 0x1000;

/// A deployed fuzz target
#[derive(Debug, Clone)]
pub struct ContractInfo {
    pub name: String,
    /// Runtime code returned by the constructor
    pub code: Vec<u8>,
    pub address: Address,
    /// Position in the session's contract list
    pub index: usize,
    pub methods: Vec<Method>,
    pub oracles: Vec<Method>,
}

impl ContractInfo {
    /// Methods sharing `name`, overloads included
    pub fn methods_named(&self, name: &str) -> Vec<&Method> {
        self.methods.iter().filter(|m| m.name == name).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TxResult {
    pub reverted: bool,
    pub exception: Option<VmError>,
    pub return_data: Vec<u8>,
}

/// Execution adapter around a `Runner`. Owns the session's deployment counter.
pub struct Executor {
    runner: Arc<dyn Runner>,
    gas_limit: u64,
    deployments: u64,
}

impl Executor {
    pub fn new(runner: Arc<dyn Runner>, gas_limit: u64) -> Self {
        Executor {
            runner,
            gas_limit,
            deployments: 0,
        }
    }

    pub fn deployer() -> Address {
        Address::from_low_u64(DEPLOYER)
    }

    /// Run constructor code once and install the returned runtime code at the
    /// next counter-derived address
    pub fn deploy(
        &mut self,
        name: &str,
        caller: Address,
        init_code: &[u8],
        state: &mut dyn StateBackend,
    ) -> Result<(Address, Vec<u8>), FuzzError> {
        let address = Address::from_low_u64(DEPLOY_BASE + self.deployments);
        self.deployments += 1;

        let ctx = CallContext {
            caller,
            address,
            code: init_code,
            input: &[],
            gas_limit: self.gas_limit,
        };
        let mut sink = TraceSink::new(false);
        state.checkpoint();
        let outcome = match self.runner.run(&ctx, state, &mut sink) {
            Ok(outcome) => outcome,
            Err(e) => {
                state.revert();
                state.commit();
                return Err(e.into());
            }
        };
        if let Some(exception) = outcome.exception {
            state.revert();
            state.commit();
            return Err(FuzzError::Deploy(name.to_string(), exception));
        }
        state.commit();
        state.put_code(&address, outcome.return_data.clone());
        debug!(
            "deployed {} at {} ({} bytes of runtime code)",
            name,
            address,
            outcome.return_data.len()
        );
        Ok((address, outcome.return_data))
    }

    /// Execute `call_data` against the code at `address`. On an exception every
    /// state change of the transaction is rolled back.
    pub fn run_transaction(
        &self,
        caller: Address,
        address: Address,
        call_data: &[u8],
        state: &mut dyn StateBackend,
        sink: &mut TraceSink,
    ) -> Result<TxResult, StateError> {
        state.checkpoint();
        let outcome = match self.execute(caller, address, call_data, state, sink) {
            Ok(outcome) => outcome,
            Err(e) => {
                state.revert();
                state.commit();
                return Err(e);
            }
        };
        if outcome.reverted {
            state.revert();
        }
        state.commit();
        Ok(outcome)
    }

    fn execute(
        &self,
        caller: Address,
        address: Address,
        call_data: &[u8],
        state: &mut dyn StateBackend,
        sink: &mut TraceSink,
    ) -> Result<TxResult, StateError> {
        let code = state.get_code(&address)?;
        let ctx = CallContext {
            caller,
            address,
            code: &code,
            input: call_data,
            gas_limit: self.gas_limit,
        };
        sink.begin_frame();
        let outcome = self.runner.run(&ctx, state, sink)?;
        Ok(TxResult {
            reverted: outcome.reverted(),
            exception: outcome.exception,
            return_data: outcome.return_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::evm::EvmRunner;
    use crate::state::WorldState;

    // clears slot 0 then reverts
    // PUSH1 0 PUSH1 0 SSTORE PUSH1 0 PUSH1 0 REVERT
    const RUNTIME: &str = "600060005560006000fd";

    fn init_code(runtime: &str) -> Vec<u8> {
        let runtime = hex::decode(runtime).unwrap();
        // PUSH1 1 PUSH1 0 SSTORE PUSH1 len PUSH1 off PUSH1 0 CODECOPY PUSH1 len PUSH1 0 RETURN
        let prefix_len = 17u8;
        let mut code = vec![
            0x60, 0x01, 0x60, 0x00, 0x55, 0x60, runtime.len() as u8, 0x60, prefix_len, 0x60, 0x00, 0x39,
            0x60, runtime.len() as u8, 0x60, 0x00, 0xf3,
        ];
        code.extend(runtime);
        code
    }

    #[test]
    fn test_deploy_counter_addresses() {
        let mut executor = Executor::new(Arc::new(EvmRunner::new()), 100_000);
        let mut state = WorldState::new();
        let (a, code) = executor
            .deploy("A", Executor::deployer(), &init_code(RUNTIME), &mut state)
            .unwrap();
        let (b, _) = executor
            .deploy("B", Executor::deployer(), &init_code(RUNTIME), &mut state)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(code, hex::decode(RUNTIME).unwrap());
        assert_eq!(state.get_code(&a).unwrap(), code);
        assert_eq!(state.get_storage(&a, &[0u8; 32]).unwrap(), vec![1]);
    }

    #[test]
    fn test_reverted_transaction_rolls_back() {
        let mut executor = Executor::new(Arc::new(EvmRunner::new()), 100_000);
        let mut state = WorldState::new();
        let (a, _) = executor
            .deploy("A", Executor::deployer(), &init_code(RUNTIME), &mut state)
            .unwrap();
        let mut sink = TraceSink::new(false);
        let result = executor
            .run_transaction(Executor::deployer(), a, &[], &mut state, &mut sink)
            .unwrap();
        assert!(result.reverted);
        assert_eq!(result.exception, Some(VmError::Revert));
        assert_eq!(state.get_storage(&a, &[0u8; 32]).unwrap(), vec![1]);
        assert_eq!(state.checkpoint_depth(), 0);
        assert!(!sink.dag().is_empty());
    }

    #[test]
    fn test_failing_constructor() {
        let mut executor = Executor::new(Arc::new(EvmRunner::new()), 100_000);
        let mut state = WorldState::new();
        let err = executor
            .deploy("Bad", Executor::deployer(), &[0xfe], &mut state)
            .unwrap_err();
        assert!(matches!(err, FuzzError::Deploy(_, VmError::InvalidOpcode(0xfe))));
    }
}
