use alloy_primitives::U256;
use thiserror::Error;

use crate::state::{Address, StateBackend, StateError};

/// Interpreter exceptions. These are execution outcomes, not engine failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("execution reverted")]
    Revert,
    #[error("out of gas")]
    OutOfGas,
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("memory limit exceeded")]
    MemoryLimit,
    #[error("halted: {0}")]
    Halt(String),
    /// The transaction never started, e.g. its gas limit is below the intrinsic cost
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// One call into the interpreter
#[derive(Debug, Clone)]
pub struct CallContext<'a> {
    pub caller: Address,
    pub address: Address,
    pub code: &'a [u8],
    pub input: &'a [u8],
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub return_data: Vec<u8>,
    pub exception: Option<VmError>,
    pub gas_used: u64,
}

impl ExecOutcome {
    pub fn reverted(&self) -> bool {
        self.exception.is_some()
    }
}

/// Interpreter state right before an opcode executes. The stack top is the last element.
pub struct Step<'a> {
    pub pc: usize,
    pub opcode: u8,
    pub depth: usize,
    pub stack: &'a [U256],
    pub memory: &'a [u8],
}

/// Per-opcode trace hook
pub trait Tracer {
    fn step(&mut self, step: &Step<'_>);
}

/// Tracer that ignores every step
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn step(&mut self, _step: &Step<'_>) {}
}

/// Contract bytecode interpreter.
///
/// Implementations execute `ctx.code` against `state`, report every executed
/// opcode to `tracer` and surface interpreter exceptions through
/// `ExecOutcome::exception`. `Err` is reserved for state access failures.
pub trait Runner: Send + Sync {
    fn run(
        &self,
        ctx: &CallContext<'_>,
        state: &mut dyn StateBackend,
        tracer: &mut dyn Tracer,
    ) -> Result<ExecOutcome, StateError>;
}
