use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use log::{error, info};

use gecko_fuzzer::{
    cli::{
        args::{BlackboxArgs, Command, CommonArgs, FuzzArgs, NetworkArgs, OnboardArgs, Opt, ReplayArgs},
        config::Config,
    },
    fuzzer::{
        stats::Statistics,
        worker::{run_batch, BatchOptions, Job, StateFactory},
        AbiTarget, FuzzConfig, FuzzError, FuzzResult,
    },
    network::{
        miner::Miner, onboard, validator::Validator, BlobStore, GatewayBlobStore, JsonRegistry,
        ProjectRegistry,
    },
    oracle::{OracleDetector, TransferDetector, ViolationDetector},
    replay::{FindingEnvelope, ReplayRecord, Replayer},
    runner::{EvmRunner, Runner},
    state::{Address, AddressExt, RpcStateSource, StateSource, WorldState},
};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

fn load_config(path: &Option<String>, args: &CommonArgs) -> Result<Config, FuzzError> {
    let mut config = match path {
        Some(path) => Config::load_config(path)?,
        None => Config::default(),
    };
    config.apply(args);
    Ok(config)
}

fn load_targets(prefixes: &[String]) -> Result<Vec<AbiTarget>, FuzzError> {
    prefixes
        .iter()
        .map(|prefix| {
            let name = Path::new(prefix)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| prefix.clone());
            let bin = PathBuf::from(format!("{}.bin", prefix));
            let abi = PathBuf::from(format!("{}.abi", prefix));
            onboard::load_target(&name, &bin, &abi).map(|(target, _)| target)
        })
        .collect()
}

fn rpc_source(config: &Config) -> Result<Arc<dyn StateSource>, FuzzError> {
    let url = config
        .rpc_url
        .as_deref()
        .ok_or_else(|| FuzzError::Config("blackbox mode needs an rpc_url".to_string()))?;
    Ok(Arc::new(RpcStateSource::new(url)?))
}

fn runtime() -> Result<tokio::runtime::Runtime, FuzzError> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}

fn blob_store(config: &Config) -> Result<Arc<dyn BlobStore>, FuzzError> {
    let url = config
        .blob_gateway
        .as_deref()
        .ok_or_else(|| FuzzError::Config("a blob_gateway is required".to_string()))?;
    Ok(Arc::new(GatewayBlobStore::new(url, GATEWAY_TIMEOUT)?))
}

fn registry(config: &Config) -> Result<Arc<dyn ProjectRegistry>, FuzzError> {
    let path = config
        .registry_file
        .as_deref()
        .ok_or_else(|| FuzzError::Config("a registry_file is required".to_string()))?;
    Ok(Arc::new(JsonRegistry::open(path)?))
}

fn report(results: Vec<(String, Result<FuzzResult, FuzzError>)>) {
    for (name, result) in results {
        match result {
            Ok(result) => {
                println!("{} | {}", name, result.stats);
                for oracle in result.violations.keys() {
                    println!("    violated: {}", oracle);
                }
            }
            Err(e) => println!("{} | failed: {}", name, e),
        }
    }
}

fn batch_options(config: &Config, engine: FuzzConfig) -> BatchOptions {
    BatchOptions {
        cores: config.cores,
        config: engine,
        workspace: Some(PathBuf::from(&config.workspace)),
        logs: config.logs,
    }
}

fn fuzz(config_path: &Option<String>, args: FuzzArgs) -> Result<(), FuzzError> {
    let mut config = load_config(config_path, &args.common)?;
    if !args.contract.is_empty() {
        config.contracts = args.contract;
    }
    if config.contracts.is_empty() {
        return Err(FuzzError::Config("no contract to fuzz".to_string()));
    }
    let seed = config.seed();
    info!("Fuzzing SEED => {}", seed);

    let targets = load_targets(&config.contracts)?;
    let jobs = if args.batch {
        targets
            .into_iter()
            .map(|target| Job::Abi {
                name: target.name.clone(),
                targets: vec![target],
            })
            .collect()
    } else {
        vec![Job::Abi {
            name: config.contracts.join(","),
            targets,
        }]
    };
    let make_state: StateFactory = Arc::new(WorldState::new);
    let stats = Arc::new(Mutex::new(Statistics::default()));
    let results = run_batch(
        jobs,
        batch_options(&config, config.to_fuzz_config(seed)),
        Arc::new(EvmRunner::default()),
        make_state,
        stats,
    );
    report(results);
    Ok(())
}

fn blackbox(config_path: &Option<String>, args: BlackboxArgs) -> Result<(), FuzzError> {
    let mut config = load_config(config_path, &args.common)?;
    if !args.target.is_empty() {
        config.targets = args.target;
    }
    if let Some(max) = args.max_violations {
        config.max_violations = max;
    }
    if config.targets.is_empty() {
        return Err(FuzzError::Config("no target to fuzz".to_string()));
    }
    let source = rpc_source(&config)?;
    let seed = config.seed();
    info!("Fuzzing SEED => {}", seed);

    let jobs = config
        .targets
        .iter()
        .map(|target| {
            Ok(Job::Raw {
                name: target.clone(),
                address: Address::parse_hex(target)?,
            })
        })
        .collect::<Result<Vec<Job>, FuzzError>>()?;
    let make_state: StateFactory = Arc::new(move || WorldState::with_source(source.clone()));
    let stats = Arc::new(Mutex::new(Statistics::default()));
    let results = run_batch(
        jobs,
        batch_options(&config, config.to_blackbox_config(seed)),
        Arc::new(EvmRunner::default()),
        make_state,
        stats,
    );
    report(results);
    Ok(())
}

fn replay(config_path: &Option<String>, args: ReplayArgs) -> Result<(), FuzzError> {
    let config = load_config(config_path, &args.common)?;
    let input = fs::read_to_string(&args.input)?;
    // findings wrap the record, bare records are accepted too
    let record = match serde_json::from_str::<FindingEnvelope>(&input) {
        Ok(envelope) => envelope.record()?,
        Err(_) => ReplayRecord::from_json(&input)?,
    };

    let runner: Arc<dyn Runner> = Arc::new(EvmRunner::default());
    let engine = config.to_fuzz_config(0);
    let replayer = match &args.target {
        Some(target) => {
            let mut replayer = Replayer::new(&engine, runner, Box::new(TransferDetector));
            let state = WorldState::with_source(rpc_source(&config)?);
            replayer.attach(target, Address::parse_hex(target)?, state)?;
            replayer
        }
        None => {
            let contracts = if args.contract.is_empty() {
                &config.contracts
            } else {
                &args.contract
            };
            let detector: Box<dyn ViolationDetector> = Box::new(OracleDetector);
            let mut replayer = Replayer::new(&engine, runner, detector);
            replayer.deploy(&load_targets(contracts)?, WorldState::new())?;
            replayer
        }
    };
    let outcome = replayer.rerun(&record)?;
    match &outcome.oracle {
        Some(oracle) => println!("violated: {}", oracle),
        None if outcome.reverted => println!("reverted"),
        None => println!("no violation"),
    }
    println!("{} edges", outcome.dag.len());
    for edge in outcome.dag.edges() {
        info!("{}", edge);
    }
    Ok(())
}

fn onboard_project(config_path: &Option<String>, args: OnboardArgs) -> Result<(), FuzzError> {
    let mut config = load_config(config_path, &args.common)?;
    if args.common.iterations.is_none() && args.common.run_time.is_none() {
        // a short pass is enough to catch low hanging fruits
        config.run_time = Some(10);
        config.iterations = None;
    }
    let blobs = blob_store(&config)?;
    let engine = config.to_fuzz_config(config.seed());
    let token = runtime()?.block_on(onboard::onboard(
        Path::new(&args.dir),
        blobs.as_ref(),
        Arc::new(EvmRunner::default()),
        engine,
    ))?;
    info!("onboarding {:?}", token);
    println!("{}", token.to_base64()?);
    Ok(())
}

fn miner(config_path: &Option<String>, args: NetworkArgs) -> Result<(), FuzzError> {
    let config = load_config(config_path, &args.common)?;
    let mut miner = Miner::new(
        registry(&config)?,
        blob_store(&config)?,
        Arc::new(EvmRunner::default()),
        config.to_fuzz_config(config.seed()),
        Duration::from_secs(args.poll),
    );
    runtime()?.block_on(miner.run(args.rounds));
    Ok(())
}

fn validator(config_path: &Option<String>, args: NetworkArgs) -> Result<(), FuzzError> {
    let config = load_config(config_path, &args.common)?;
    let mut validator = Validator::new(
        registry(&config)?,
        blob_store(&config)?,
        Arc::new(EvmRunner::default()),
        config.to_fuzz_config(config.seed()),
        Duration::from_secs(args.poll),
    );
    runtime()?.block_on(validator.run(args.rounds));
    Ok(())
}

fn main() {
    let opt = Opt::parse();

    // Initialize the logger
    colog::init();

    let result = match opt.command {
        Command::Fuzz(args) => fuzz(&opt.config, args),
        Command::Blackbox(args) => blackbox(&opt.config, args),
        Command::Replay(args) => replay(&opt.config, args),
        Command::Onboard(args) => onboard_project(&opt.config, args),
        Command::Miner(args) => miner(&opt.config, args),
        Command::Validator(args) => validator(&opt.config, args),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
