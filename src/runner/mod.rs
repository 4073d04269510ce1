//! Execution layer: the interpreter seam, the bundled interpreter, tracing and
//! the deploy/transaction adapter used by the fuzzer.

pub mod evm;
pub mod executor;
pub mod runner;
pub mod trace;

pub use executor::{ContractInfo, Executor, TxResult};
pub use runner::{CallContext, ExecOutcome, Runner, Step, Tracer, VmError};
pub use evm::EvmRunner;
pub use trace::{Dag, Edge, TraceSink, Transfer};
