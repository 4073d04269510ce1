use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use num_bigint::BigUint;
use rand::{rngs::StdRng, SeedableRng};

use super::{
    corpus::{Corpus, EvictionPolicy, Seed, SeedInput},
    coverage::Coverage,
    error::FuzzError,
    handler::FindingHandler,
    state_pool::StatePool,
    stats::Statistics,
};
use crate::{
    json::json_parser::ContractAbi,
    mutator::{
        encode::encode_call,
        mutate_args,
        raw::{extract_selectors, mutate_calldata, pad_calldata},
        AbiValue,
    },
    oracle::{Detection, Verdict, ViolationDetector},
    replay::ReplayRecord,
    runner::{ContractInfo, Executor, Runner, TraceSink},
    state::{Address, AddressExt, StateBackend, StateSource, WorldState},
};

/// Per-run engine parameters
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    pub seed: u64,
    /// Stop after this many executions
    pub iterations: Option<u64>,
    /// Stop after this many seconds, checked once per epoch
    pub run_time: Option<u64>,
    pub epoch_size: u64,
    pub gas_limit: u64,
    /// Exclusive ceiling of generated unsigned values
    pub uint_cap: u64,
    /// Report every violation and stop after this many. Without a cap each
    /// violated name is reported once.
    pub max_violations: Option<usize>,
    /// Cap on saved post-states. The deployment state always stays.
    pub max_states: Option<usize>,
    pub caller: Address,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        FuzzConfig {
            seed: 0,
            iterations: Some(10_000),
            run_time: None,
            epoch_size: 5000,
            gas_limit: 1_000_000,
            uint_cap: 10_000,
            max_violations: None,
            max_states: None,
            caller: Executor::deployer(),
        }
    }
}

/// Contract compiled with an ABI
#[derive(Debug, Clone)]
pub struct AbiTarget {
    pub name: String,
    pub init_code: Vec<u8>,
    pub abi: ContractAbi,
}

/// Outcome of one fuzzing run
#[derive(Debug, Clone, Default)]
pub struct FuzzResult {
    /// Shortest known record per violated name
    pub violations: BTreeMap<String, ReplayRecord>,
    /// Records of every input that produced new coverage
    pub testcases: Vec<ReplayRecord>,
    pub stats: Statistics,
}

pub struct Fuzzer {
    config: FuzzConfig,
    uint_cap: BigUint,
    rng: StdRng,
    executor: Executor,
    detector: Box<dyn ViolationDetector>,
    contracts: Vec<ContractInfo>,
    corpus: Corpus,
    pool: StatePool,
    coverage: Coverage,
    sink: TraceSink,
    /// Calldata length read per selector, raw inputs only
    learned_len: HashMap<[u8; 4], usize>,
    violations: BTreeMap<String, (usize, ReplayRecord)>,
    reported: usize,
    testcases: Vec<ReplayRecord>,
    stats: Statistics,
    /// Lazy backing of the session state, reused for replayed snapshots
    source: Option<Arc<dyn StateSource>>,
}

impl Fuzzer {
    pub fn new(
        config: FuzzConfig,
        runner: Arc<dyn Runner>,
        detector: Box<dyn ViolationDetector>,
    ) -> Self {
        let sink = TraceSink::new(detector.watches_transfers());
        Fuzzer {
            uint_cap: BigUint::from(config.uint_cap),
            rng: StdRng::seed_from_u64(config.seed),
            executor: Executor::new(runner, config.gas_limit),
            detector,
            contracts: Vec::new(),
            corpus: Corpus::default(),
            pool: config.max_states.map(StatePool::bounded).unwrap_or_default(),
            coverage: Coverage::default(),
            sink,
            learned_len: HashMap::new(),
            violations: BTreeMap::new(),
            reported: 0,
            testcases: Vec::new(),
            stats: Statistics::default(),
            source: None,
            config,
        }
    }

    pub fn with_eviction(mut self, policy: Box<dyn EvictionPolicy>) -> Self {
        self.corpus = Corpus::new(policy);
        self
    }

    pub fn contracts(&self) -> &[ContractInfo] {
        &self.contracts
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Deploy every target into `state` and seed the corpus with one
    /// default-argument entry per method
    pub fn setup(&mut self, targets: &[AbiTarget], mut state: WorldState) -> Result<(), FuzzError> {
        let deployed = deploy_targets(&mut self.executor, targets, &mut state)?;
        self.contracts.extend(deployed);

        self.source = state.source();
        let base = Arc::new(state);
        self.pool.push(base.clone());
        for contract in &self.contracts {
            for (idx, method) in contract.methods.iter().enumerate() {
                let args = method
                    .inputs
                    .iter()
                    .map(|ty| AbiValue::new(ty, &self.uint_cap))
                    .collect();
                self.corpus.push(Seed {
                    contract: contract.index,
                    input: SeedInput::Abi { method: idx, args },
                    state: base.clone(),
                });
            }
        }
        info!(
            "deployed {} contracts, {} initial seeds",
            self.contracts.len(),
            self.corpus.len()
        );
        Ok(())
    }

    /// Target already present at `address`, fuzzed with raw calldata. One seed
    /// per selector found in its dispatcher.
    pub fn setup_raw(&mut self, name: &str, address: Address, mut state: WorldState) -> Result<(), FuzzError> {
        let code = state.get_code(&address)?;
        let selectors = extract_selectors(&code);
        info!("{}: {} bytes of code, {} selectors", name, code.len(), selectors.len());
        self.contracts.push(ContractInfo {
            name: name.to_string(),
            code,
            address,
            index: self.contracts.len(),
            methods: vec![],
            oracles: vec![],
        });
        let contract = self.contracts.len() - 1;

        self.source = state.source();
        let base = Arc::new(state);
        self.pool.push(base.clone());
        let selectors = if selectors.is_empty() {
            vec![[0u8; 4]]
        } else {
            selectors
        };
        for selector in selectors {
            self.corpus.push(Seed {
                contract,
                input: SeedInput::Raw {
                    selector,
                    data: selector.to_vec(),
                },
                state: base.clone(),
            });
        }
        Ok(())
    }

    /// Rebuild the seed a replay record describes
    pub fn seed_from_record(&self, record: &ReplayRecord) -> Result<Seed, FuzzError> {
        let contract = self
            .contracts
            .get(record.idx)
            .ok_or(FuzzError::UnknownContract(record.idx))?;
        let state = WorldState::from_snapshot(&record.sm, self.source.clone())?;
        let input = match record.raw_calldata()? {
            Some(data) => {
                let mut selector = [0u8; 4];
                for (dst, src) in selector.iter_mut().zip(data.iter()) {
                    *dst = *src;
                }
                SeedInput::Raw { selector, data }
            }
            None => {
                let (idx, args) = resolve_args(contract, &record.method, &record.args, &self.uint_cap)?;
                SeedInput::Abi { method: idx, args }
            }
        };
        Ok(Seed {
            contract: record.idx,
            input,
            state: Arc::new(state),
        })
    }

    /// Replay persisted testcases to pre-populate coverage and corpus.
    /// Records that no longer fit the contracts are skipped.
    pub fn load_testcases(
        &mut self,
        records: &[ReplayRecord],
        handler: &mut dyn FindingHandler,
    ) -> Result<(), FuzzError> {
        for record in records {
            let seed = match self.seed_from_record(record) {
                Ok(seed) => seed,
                Err(e) => {
                    warn!("skipping testcase for {}: {}", record.method, e);
                    continue;
                }
            };
            self.pool.push(seed.state.clone());
            self.evaluate(seed.contract, seed.input.clone(), seed.state.clone(), handler, false)?;
            self.corpus.push(seed);
        }
        info!(
            "loaded {} testcases, coverage {}",
            records.len(),
            self.coverage.len()
        );
        Ok(())
    }

    fn budget_exhausted(&self, start: &Instant, check_clock: bool) -> bool {
        if let Some(iterations) = self.config.iterations {
            if self.stats.fuzz_cases >= iterations {
                return true;
            }
        }
        if let Some(cap) = self.config.max_violations {
            if self.reported >= cap {
                return true;
            }
        }
        if check_clock {
            if let Some(run_time) = self.config.run_time {
                return start.elapsed() >= Duration::from_secs(run_time);
            }
        }
        false
    }

    /// Main loop: select, mutate, execute, classify, retain or report, until the budget runs out
    pub fn run(&mut self, handler: &mut dyn FindingHandler) -> Result<FuzzResult, FuzzError> {
        let start = Instant::now();
        if self.corpus.is_empty() || self.pool.is_empty() {
            warn!("nothing to fuzz");
            return Ok(self.result());
        }
        let epoch = self.config.epoch_size.max(1);
        let mut epoch_start = Instant::now();
        while !self.budget_exhausted(&start, false) {
            self.fuzz_one(handler)?;

            // the clock is only consulted once per epoch
            if self.stats.fuzz_cases % epoch == 0 {
                let elapsed = epoch_start.elapsed().as_secs_f64();
                info!(
                    "{:10} ms | {:10.0} exec/s | {}",
                    start.elapsed().as_millis(),
                    epoch as f64 / elapsed.max(f64::EPSILON),
                    self.snapshot_stats()
                );
                epoch_start = Instant::now();
                if self.budget_exhausted(&start, true) {
                    break;
                }
            }
        }
        self.stats.threads_finished += 1;
        Ok(self.result())
    }

    fn snapshot_stats(&mut self) -> Statistics {
        self.stats.coverage = self.coverage.len();
        self.stats.corpus = self.corpus.len();
        self.stats.clone()
    }

    fn result(&mut self) -> FuzzResult {
        FuzzResult {
            violations: self
                .violations
                .iter()
                .map(|(name, (_, record))| (name.clone(), record.clone()))
                .collect(),
            testcases: self.testcases.clone(),
            stats: self.snapshot_stats(),
        }
    }

    /// One iteration of the loop
    pub fn fuzz_one(&mut self, handler: &mut dyn FindingHandler) -> Result<(), FuzzError> {
        let Some(seed) = self.corpus.select(&mut self.rng).cloned() else {
            return Ok(());
        };
        let Some((pool_idx, state)) = self.pool.priority_sample(&mut self.rng) else {
            return Ok(());
        };
        self.pool.on_sampled(pool_idx);

        let input = match seed.input {
            SeedInput::Abi { method, mut args } => {
                mutate_args(&mut args, &mut self.rng);
                SeedInput::Abi { method, args }
            }
            SeedInput::Raw { selector, data } => {
                let learned = self.learned_len.get(&selector).copied().unwrap_or(data.len());
                let data = mutate_calldata(&data, learned, &mut self.rng);
                SeedInput::Raw { selector, data }
            }
        };
        self.evaluate(seed.contract, input, state, handler, true)
    }

    /// Execute `input` against a copy of `pre` and act on the outcome
    fn evaluate(
        &mut self,
        contract_idx: usize,
        input: SeedInput,
        pre: Arc<WorldState>,
        handler: &mut dyn FindingHandler,
        report_testcase: bool,
    ) -> Result<(), FuzzError> {
        let contract = self
            .contracts
            .get(contract_idx)
            .ok_or(FuzzError::UnknownContract(contract_idx))?
            .clone();
        let calldata = encode_input(&contract, &input)?;
        let caller = self.config.caller;

        let mut state = pre.copy();
        self.sink.reset();
        let tx = self
            .executor
            .run_transaction(caller, contract.address, &calldata, &mut state, &mut self.sink)?;
        self.stats.fuzz_cases += 1;

        if let SeedInput::Raw { selector, .. } = &input {
            let learned = self.sink.learned_calldata_len();
            let entry = self.learned_len.entry(*selector).or_insert(0);
            *entry = (*entry).max(learned);
        }

        let detection = Detection {
            executor: &self.executor,
            caller,
            contract: &contract,
            tx: &tx,
        };
        let verdict = self.detector.detect(&detection, &mut state, &mut self.sink)?;

        if tx.reverted {
            self.stats.reverts += 1;
            if let Verdict::Potential(name) = verdict {
                self.stats.potential_violations += 1;
                info!("potential {} violation on a reverted transaction", name);
            }
            return Ok(());
        }

        let dag = self.sink.take_dag();
        let new_edges = self.coverage.observe(&dag);

        if let Verdict::Violation(name) = &verdict {
            let record = build_record(&contract, &input, &pre, caller);
            self.report_violation(&contract, name, record, handler)?;
        }

        if new_edges > 0 {
            debug!("{} new edges, coverage {}", new_edges, self.coverage.len());
            let record = build_record(&contract, &input, &pre, caller);
            let post = Arc::new(state);
            if !post.same_contents(&pre) {
                self.pool.push(post.clone());
            }
            self.corpus.push(Seed {
                contract: contract_idx,
                input,
                state: post,
            });
            if report_testcase {
                handler.on_testcase(&contract, &record)?;
            }
            self.testcases.push(record);
        }
        Ok(())
    }

    fn report_violation(
        &mut self,
        contract: &ContractInfo,
        name: &str,
        record: ReplayRecord,
        handler: &mut dyn FindingHandler,
    ) -> Result<(), FuzzError> {
        self.stats.violations += 1;
        let len = record.to_json()?.len();
        let capped = self.config.max_violations.is_some();
        match self.violations.get(name) {
            None => {
                info!("{} violated by {}", name, record.method);
                handler.on_violation(contract, name, &record)?;
                self.reported += 1;
                self.stats.unique_violations += 1;
                self.violations.insert(name.to_string(), (len, record));
            }
            Some((known, _)) => {
                if capped {
                    handler.on_violation(contract, name, &record)?;
                    self.reported += 1;
                }
                // keep the shortest reproduction
                if len < *known {
                    self.violations.insert(name.to_string(), (len, record));
                }
            }
        }
        Ok(())
    }
}

/// Deploy `targets` in order from the deployer account. Indices follow the slice.
pub fn deploy_targets(
    executor: &mut Executor,
    targets: &[AbiTarget],
    state: &mut WorldState,
) -> Result<Vec<ContractInfo>, FuzzError> {
    let mut contracts = Vec::with_capacity(targets.len());
    for target in targets {
        let (address, code) =
            executor.deploy(&target.name, Executor::deployer(), &target.init_code, state)?;
        contracts.push(ContractInfo {
            name: target.name.clone(),
            code,
            address,
            index: contracts.len(),
            methods: target.abi.methods.clone(),
            oracles: target.abi.oracles.clone(),
        });
    }
    Ok(contracts)
}

/// Find `method` on `contract` and rebuild its argument nodes from their serialized form
pub fn resolve_args(
    contract: &ContractInfo,
    method: &str,
    args: &[String],
    uint_cap: &BigUint,
) -> Result<(usize, Vec<AbiValue>), FuzzError> {
    let matches: Vec<usize> = contract
        .methods
        .iter()
        .enumerate()
        .filter(|(_, m)| m.name == method)
        .map(|(idx, _)| idx)
        .collect();
    let idx = match matches.as_slice() {
        [] => return Err(FuzzError::UnknownMethod(method.to_string())),
        [idx] => *idx,
        many => return Err(FuzzError::AmbiguousMethod(method.to_string(), many.len())),
    };
    let inputs = &contract.methods[idx].inputs;
    if inputs.len() != args.len() {
        return Err(FuzzError::Record(format!(
            "{} takes {} arguments, record has {}",
            method,
            inputs.len(),
            args.len()
        )));
    }
    let mut values = Vec::with_capacity(args.len());
    for (ty, serialized) in inputs.iter().zip(args.iter()) {
        let mut value = AbiValue::new(ty, uint_cap);
        value.deserialize(serialized)?;
        values.push(value);
    }
    Ok((idx, values))
}

/// Calldata for `input`. Raw inputs are zero padded.
pub fn encode_input(contract: &ContractInfo, input: &SeedInput) -> Result<Vec<u8>, FuzzError> {
    match input {
        SeedInput::Abi { method, args } => {
            let method = contract
                .methods
                .get(*method)
                .ok_or_else(|| FuzzError::UnknownMethod(format!("#{}", method)))?;
            Ok(encode_call(method.selector, args))
        }
        SeedInput::Raw { data, .. } => Ok(pad_calldata(data)),
    }
}

/// Replay record of `input` executed against `pre`
pub fn build_record(
    contract: &ContractInfo,
    input: &SeedInput,
    pre: &WorldState,
    caller: Address,
) -> ReplayRecord {
    let (method, args, data) = match input {
        SeedInput::Abi { method, args } => (
            contract
                .methods
                .get(*method)
                .map(|m| m.name.clone())
                .unwrap_or_default(),
            args.iter().map(AbiValue::serialize).collect(),
            None,
        ),
        SeedInput::Raw { selector, data } => (hex::encode(selector), vec![], Some(hex::encode(data))),
    };
    ReplayRecord {
        method,
        args,
        sm: pre.to_snapshot(),
        caller: caller.to_base64(),
        idx: contract.index,
        data,
    }
}
