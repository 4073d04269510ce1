use std::sync::Arc;

use log::{debug, info};
use num_bigint::BigUint;

use crate::{
    fuzzer::{
        corpus::SeedInput,
        fuzzer::{deploy_targets, encode_input, resolve_args},
        AbiTarget, FuzzConfig, FuzzError,
    },
    oracle::{Detection, Verdict, ViolationDetector},
    runner::{ContractInfo, Dag, Executor, Runner, TraceSink},
    state::{Address, StateBackend, StateSource, WorldState},
};

use super::{FindingEnvelope, ReplayRecord};

/// Observable result of re-executing a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerunOutcome {
    /// Violated property, if any
    pub oracle: Option<String>,
    pub dag: Dag,
    pub reverted: bool,
}

/// Re-executes replay records against freshly deployed contracts
pub struct Replayer {
    executor: Executor,
    detector: Box<dyn ViolationDetector>,
    contracts: Vec<ContractInfo>,
    uint_cap: BigUint,
    source: Option<Arc<dyn StateSource>>,
}

impl Replayer {
    pub fn new(config: &FuzzConfig, runner: Arc<dyn Runner>, detector: Box<dyn ViolationDetector>) -> Self {
        Replayer {
            executor: Executor::new(runner, config.gas_limit),
            detector,
            contracts: Vec::new(),
            uint_cap: BigUint::from(config.uint_cap),
            source: None,
        }
    }

    /// Deploy `targets` the same way a fuzzing session does, so contract
    /// indices and addresses line up with the recorded ones
    pub fn deploy(&mut self, targets: &[AbiTarget], mut state: WorldState) -> Result<(), FuzzError> {
        self.contracts = deploy_targets(&mut self.executor, targets, &mut state)?;
        self.source = state.source();
        Ok(())
    }

    /// Replay raw records against code already present at `address`
    pub fn attach(&mut self, name: &str, address: Address, mut state: WorldState) -> Result<(), FuzzError> {
        let code = state.get_code(&address)?;
        self.contracts = vec![ContractInfo {
            name: name.to_string(),
            code,
            address,
            index: 0,
            methods: vec![],
            oracles: vec![],
        }];
        self.source = state.source();
        Ok(())
    }

    pub fn contracts(&self) -> &[ContractInfo] {
        &self.contracts
    }

    /// Rebuild the state and arguments of `record`, execute it once and run the
    /// detector. A method name shared by several overloads is rejected.
    pub fn rerun(&self, record: &ReplayRecord) -> Result<RerunOutcome, FuzzError> {
        let contract = self
            .contracts
            .get(record.idx)
            .ok_or(FuzzError::UnknownContract(record.idx))?;
        let input = match record.raw_calldata()? {
            Some(data) => {
                let mut selector = [0u8; 4];
                for (dst, src) in selector.iter_mut().zip(data.iter()) {
                    *dst = *src;
                }
                SeedInput::Raw { selector, data }
            }
            None => {
                let (method, args) = resolve_args(contract, &record.method, &record.args, &self.uint_cap)?;
                SeedInput::Abi { method, args }
            }
        };
        let calldata = encode_input(contract, &input)?;
        let caller = record.caller_address()?;
        let mut state = WorldState::from_snapshot(&record.sm, self.source.clone())?;

        let mut sink = TraceSink::new(self.detector.watches_transfers());
        let tx = self
            .executor
            .run_transaction(caller, contract.address, &calldata, &mut state, &mut sink)?;
        debug!("rerun {} on {}: reverted={}", record.method, contract.name, tx.reverted);

        let detection = Detection {
            executor: &self.executor,
            caller,
            contract,
            tx: &tx,
        };
        let verdict = self.detector.detect(&detection, &mut state, &mut sink)?;
        let oracle = match verdict {
            Verdict::Violation(name) => {
                info!("rerun of {} violates {}", record.method, name);
                Some(name)
            }
            Verdict::Clean | Verdict::Potential(_) => None,
        };
        Ok(RerunOutcome {
            oracle,
            dag: sink.take_dag(),
            reverted: tx.reverted,
        })
    }

    pub fn rerun_envelope(&self, envelope: &FindingEnvelope) -> Result<RerunOutcome, FuzzError> {
        self.rerun(&envelope.record()?)
    }
}
