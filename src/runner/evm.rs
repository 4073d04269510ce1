//! `Runner` backed by revm.
//!
//! The world state is exposed to revm through a `Database` adapter and the
//! per-opcode trace comes from an inspector `step` hook. State changes are
//! written back to the store only when the call succeeds.

use std::collections::HashMap;

use alloy_primitives::{keccak256, Bytes, B256, U256};
use log::trace;
use revm::{
    inspector_handle_register,
    interpreter::Interpreter,
    primitives::{
        AccountInfo, Bytecode, EVMError, EvmState, ExecutionResult, HaltReason, OutOfGasError, Output, SpecId,
        TxKind, KECCAK_EMPTY,
    },
    Database, Evm, EvmContext, Inspector,
};

use super::runner::{CallContext, ExecOutcome, Runner, Step, Tracer, VmError};
use crate::state::{Account, Address, StateBackend, StateError};

const BLOCK_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_NUMBER: u64 = 1;
const CHAIN_ID: u64 = 1;

/// EVM runner on a fixed Cancun block environment
#[derive(Debug, Clone)]
pub struct EvmRunner {
    spec: SpecId,
}

impl Default for EvmRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl EvmRunner {
    pub fn new() -> Self {
        EvmRunner { spec: SpecId::CANCUN }
    }
}

/// revm view of a `StateBackend`. The code at `target` is replaced by the
/// code of the call, which is how constructors run at their final address.
struct BackendDb<'a> {
    state: &'a mut dyn StateBackend,
    target: Address,
    code: Bytecode,
    codes: HashMap<B256, Bytecode>,
}

impl BackendDb<'_> {
    fn bytecode(&mut self, address: &Address) -> Result<Bytecode, StateError> {
        if *address == self.target {
            return Ok(self.code.clone());
        }
        let code = self.state.get_code(address)?;
        Ok(Bytecode::new_legacy(Bytes::from(code)))
    }
}

impl Database for BackendDb<'_> {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, StateError> {
        let account = if self.state.account_exists(&address) {
            self.state.get_account(&address)
        } else {
            Account::default()
        };
        let code = self.bytecode(&address)?;
        let code_hash = if code.is_empty() { KECCAK_EMPTY } else { code.hash_slow() };
        self.codes.insert(code_hash, code.clone());
        Ok(Some(AccountInfo::new(account.balance, account.nonce, code_hash, code)))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, StateError> {
        Ok(self.codes.get(&code_hash).cloned().unwrap_or_default())
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, StateError> {
        let value = self.state.get_storage(&address, &index.to_be_bytes::<32>())?;
        U256::try_from_be_slice(&value)
            .ok_or_else(|| StateError::Snapshot(format!("storage value of {} bytes at {}", value.len(), address)))
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, StateError> {
        Ok(keccak256(number.to_be_bytes()))
    }
}

/// Forwards every interpreter step to a `Tracer`
struct StepInspector<'a> {
    tracer: &'a mut dyn Tracer,
    last_opcode: Option<u8>,
}

impl<DB: Database> Inspector<DB> for StepInspector<'_> {
    fn step(&mut self, interp: &mut Interpreter, context: &mut EvmContext<DB>) {
        let opcode = interp.current_opcode();
        self.last_opcode = Some(opcode);
        // revm enters the outermost frame at depth 1
        let depth = (context.journaled_state.depth() as usize).saturating_sub(1);
        self.tracer.step(&Step {
            pc: interp.program_counter(),
            opcode,
            depth,
            stack: interp.stack.data(),
            memory: interp.shared_memory.context_memory(),
        });
    }
}

fn halt_error(reason: HaltReason, last_opcode: Option<u8>) -> VmError {
    match reason {
        HaltReason::OutOfGas(OutOfGasError::MemoryLimit) => VmError::MemoryLimit,
        HaltReason::OutOfGas(_) => VmError::OutOfGas,
        HaltReason::InvalidFEOpcode => VmError::InvalidOpcode(0xfe),
        HaltReason::OpcodeNotFound => VmError::InvalidOpcode(last_opcode.unwrap_or(0xfe)),
        HaltReason::InvalidJump => VmError::InvalidJump,
        HaltReason::StackUnderflow => VmError::StackUnderflow,
        HaltReason::StackOverflow => VmError::StackOverflow,
        other => VmError::Halt(format!("{:?}", other)),
    }
}

/// Write the accounts and slots revm changed back into `state`. The sender's
/// nonce is left alone so that a call does not change the state by itself.
fn apply_changes(state: &mut dyn StateBackend, changes: EvmState, caller: &Address) {
    for (address, account) in changes {
        if !account.is_touched() {
            continue;
        }
        if account.is_selfdestructed() {
            state.delete_account(&address);
            continue;
        }
        let existed = state.account_exists(&address);
        let mut record = if existed {
            state.get_account(&address)
        } else {
            Account::default()
        };
        let nonce = if address == *caller { record.nonce } else { account.info.nonce };
        if record.nonce != nonce || record.balance != account.info.balance {
            record.nonce = nonce;
            record.balance = account.info.balance;
            state.put_account(&address, record);
        }
        if account.is_created() {
            if let Some(code) = &account.info.code {
                state.put_code(&address, code.original_bytes().to_vec());
            }
        }
        for (slot, value) in account.storage {
            if !value.is_changed() {
                continue;
            }
            let word = value.present_value.to_be_bytes::<32>();
            let first = word.iter().position(|b| *b != 0).unwrap_or(word.len());
            state.put_storage(&address, &slot.to_be_bytes::<32>(), word[first..].to_vec());
        }
    }
}

impl Runner for EvmRunner {
    fn run(
        &self,
        ctx: &CallContext<'_>,
        state: &mut dyn StateBackend,
        tracer: &mut dyn Tracer,
    ) -> Result<ExecOutcome, StateError> {
        let mut db = BackendDb {
            state,
            target: ctx.address,
            code: Bytecode::new_legacy(Bytes::copy_from_slice(ctx.code)),
            codes: HashMap::new(),
        };
        let inspector = StepInspector {
            tracer,
            last_opcode: None,
        };

        let (result, last_opcode) = {
            let mut evm = Evm::builder()
                .with_db(&mut db)
                .with_external_context(inspector)
                .with_spec_id(self.spec)
                .append_handler_register(inspector_handle_register)
                .modify_cfg_env(|cfg| cfg.chain_id = CHAIN_ID)
                .modify_block_env(|block| {
                    block.number = U256::from(BLOCK_NUMBER);
                    block.timestamp = U256::from(BLOCK_TIMESTAMP);
                })
                .modify_tx_env(|tx| {
                    tx.caller = ctx.caller;
                    tx.transact_to = TxKind::Call(ctx.address);
                    tx.data = Bytes::copy_from_slice(ctx.input);
                    tx.value = U256::ZERO;
                    tx.gas_limit = ctx.gas_limit;
                })
                .build();
            let result = evm.transact();
            (result, evm.context.external.last_opcode)
        };

        let outcome = match result {
            Ok(result_and_state) => {
                let gas_used = result_and_state.result.gas_used();
                match result_and_state.result {
                    ExecutionResult::Success { output, .. } => {
                        apply_changes(db.state, result_and_state.state, &ctx.caller);
                        let return_data = match output {
                            Output::Call(data) => data.to_vec(),
                            Output::Create(data, _) => data.to_vec(),
                        };
                        ExecOutcome {
                            return_data,
                            exception: None,
                            gas_used,
                        }
                    }
                    ExecutionResult::Revert { output, .. } => ExecOutcome {
                        return_data: output.to_vec(),
                        exception: Some(VmError::Revert),
                        gas_used,
                    },
                    ExecutionResult::Halt { reason, .. } => ExecOutcome {
                        return_data: vec![],
                        exception: Some(halt_error(reason, last_opcode)),
                        gas_used,
                    },
                }
            }
            Err(EVMError::Database(e)) => return Err(e),
            Err(e) => {
                trace!("call to {} rejected: {}", ctx.address, e);
                ExecOutcome {
                    return_data: vec![],
                    exception: Some(VmError::Rejected(e.to_string())),
                    gas_used: 0,
                }
            }
        };
        Ok(outcome)
    }
}
