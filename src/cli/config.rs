use serde::{Deserialize, Serialize};
use std::{
    fs,
    time::{SystemTime, UNIX_EPOCH},
};

use super::args::CommonArgs;
use crate::{
    fuzzer::{FuzzConfig, FuzzError},
    runner::Executor,
};

/// Config struct to use instead of command line
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    pub workspace: String,
    /// `<prefix>.bin` / `<prefix>.abi` pairs to fuzz
    pub contracts: Vec<String>,
    /// Deployed addresses fuzzed in blackbox mode
    pub targets: Vec<String>,
    pub rpc_url: Option<String>,
    pub seed: Option<u64>,
    pub run_time: Option<u64>,
    pub iterations: Option<u64>,
    pub epoch_size: u64,
    pub cores: usize,
    pub gas_limit: u64,
    pub uint_cap: u64,
    pub max_violations: usize,
    pub max_states: Option<usize>,
    pub testcases_dir: Option<String>,
    pub blob_gateway: Option<String>,
    pub registry_file: Option<String>,
    pub logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        let engine = FuzzConfig::default();
        Config {
            workspace: "fuzzer_workspace".to_string(),
            contracts: vec![],
            targets: vec![],
            rpc_url: None,
            seed: None,
            run_time: None,
            iterations: engine.iterations,
            epoch_size: engine.epoch_size,
            cores: 1,
            gas_limit: engine.gas_limit,
            uint_cap: engine.uint_cap,
            max_violations: 10,
            max_states: None,
            testcases_dir: None,
            blob_gateway: None,
            registry_file: None,
            logs: false,
        }
    }
}

impl Config {
    /// Create a Config using the provided config file
    pub fn load_config(config_file: &str) -> Result<Self, FuzzError> {
        let config_string = fs::read_to_string(config_file)
            .map_err(|e| FuzzError::Config(format!("unable to read {}: {}", config_file, e)))?;
        serde_json::from_str(&config_string)
            .map_err(|e| FuzzError::Config(format!("could not parse {}: {}", config_file, e)))
    }

    /// Command line flags take precedence over the file
    pub fn apply(&mut self, args: &CommonArgs) {
        if let Some(workspace) = &args.workspace {
            self.workspace = workspace.clone();
        }
        if let Some(rpc_url) = &args.rpc_url {
            self.rpc_url = Some(rpc_url.clone());
        }
        if args.seed.is_some() {
            self.seed = args.seed;
        }
        if args.run_time.is_some() {
            self.run_time = args.run_time;
        }
        if args.iterations.is_some() {
            self.iterations = args.iterations;
        }
        if let Some(cores) = args.cores {
            self.cores = cores;
        }
        if let Some(gas_limit) = args.gas_limit {
            self.gas_limit = gas_limit;
        }
        if let Some(uint_cap) = args.uint_cap {
            self.uint_cap = uint_cap;
        }
        if let Some(blob_gateway) = &args.blob_gateway {
            self.blob_gateway = Some(blob_gateway.clone());
        }
        if let Some(registry_file) = &args.registry_file {
            self.registry_file = Some(registry_file.clone());
        }
        self.logs |= args.logs;
    }

    /// Seed of the session, the current time in ms when unset
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        })
    }

    pub fn to_fuzz_config(&self, seed: u64) -> FuzzConfig {
        FuzzConfig {
            seed,
            // a time budget alone means "run until the clock says stop"
            iterations: if self.run_time.is_some() && self.iterations.is_none() {
                None
            } else {
                self.iterations
            },
            run_time: self.run_time,
            epoch_size: self.epoch_size,
            gas_limit: self.gas_limit,
            uint_cap: self.uint_cap,
            max_violations: None,
            max_states: self.max_states,
            caller: Executor::deployer(),
        }
    }

    /// Engine parameters of blackbox runs, which stop after `max_violations` reports
    pub fn to_blackbox_config(&self, seed: u64) -> FuzzConfig {
        FuzzConfig {
            max_violations: Some(self.max_violations),
            ..self.to_fuzz_config(seed)
        }
    }
}
