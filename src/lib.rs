//! Coverage-guided fuzzer for EVM smart contracts.
//!
//! Contracts are driven through their ABI (or raw calldata in blackbox mode),
//! inputs that reach new control-flow edges are kept together with the world
//! state they produced, and properties are checked after every transaction.

pub mod cli;
pub mod fuzzer;
pub mod json;
pub mod mutator;
pub mod network;
pub mod oracle;
pub mod replay;
pub mod runner;
pub mod state;
