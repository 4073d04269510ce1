//! This module contains everything related to the fuzzer: the main loop, the corpus and
//! state pool, coverage tracking, finding handlers, the batch workers and their stats.

pub mod corpus;
pub mod coverage;
pub mod error;
pub mod fuzzer;
pub mod fuzzer_utils;
pub mod handler;
pub mod state_pool;
pub mod stats;
pub mod worker;

pub use error::FuzzError;
pub use fuzzer::{AbiTarget, FuzzConfig, FuzzResult, Fuzzer};
