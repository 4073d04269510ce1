use std::{
    collections::VecDeque,
    fs::File,
    io::Write,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use log::{error, info};

use super::{
    error::FuzzError,
    fuzzer::{AbiTarget, FuzzConfig, FuzzResult, Fuzzer},
    fuzzer_utils::load_testcases,
    handler::{DiskHandler, FindingHandler, NoopHandler},
    stats::Statistics,
};
use crate::{
    oracle::{OracleDetector, TransferDetector, ViolationDetector},
    runner::Runner,
    state::{Address, WorldState},
};

/// One independent fuzzing unit
#[derive(Debug, Clone)]
pub enum Job {
    /// Contracts deployed side by side in one session
    Abi { name: String, targets: Vec<AbiTarget> },
    /// Code already deployed at `address`, fuzzed without an ABI
    Raw { name: String, address: Address },
}

impl Job {
    pub fn name(&self) -> &str {
        match self {
            Job::Abi { name, .. } | Job::Raw { name, .. } => name,
        }
    }
}

/// Builds the initial world state of each run
pub type StateFactory = Arc<dyn Fn() -> WorldState + Send + Sync>;

#[derive(Clone)]
pub struct BatchOptions {
    pub cores: usize,
    pub config: FuzzConfig,
    /// Persist findings and reload testcases under this directory
    pub workspace: Option<PathBuf>,
    /// Dump monitor lines into `fuzz_stats.txt`
    pub logs: bool,
}

type JobResult = (usize, String, Result<FuzzResult, FuzzError>);

/// Run a single job to completion with its own state, corpus and RNG
pub fn run_job(
    job: &Job,
    config: FuzzConfig,
    runner: Arc<dyn Runner>,
    state: WorldState,
    workspace: Option<&PathBuf>,
) -> Result<FuzzResult, FuzzError> {
    let mut handler: Box<dyn FindingHandler> = match workspace {
        Some(dir) => Box::new(DiskHandler::new(dir.clone())),
        None => Box::new(NoopHandler),
    };
    match job {
        Job::Abi { targets, .. } => {
            let mut fuzzer = Fuzzer::new(config, runner, Box::new(OracleDetector));
            fuzzer.setup(targets, state)?;
            if let Some(dir) = workspace {
                for target in targets {
                    let testcases = dir.join(&target.name).join("testcases");
                    if testcases.is_dir() {
                        let records = load_testcases(&testcases)?;
                        fuzzer.load_testcases(&records, &mut NoopHandler)?;
                    }
                }
            }
            fuzzer.run(handler.as_mut())
        }
        Job::Raw { name, address } => {
            let detector: Box<dyn ViolationDetector> = Box::new(TransferDetector);
            let mut fuzzer = Fuzzer::new(config, runner, detector);
            fuzzer.setup_raw(name, *address, state)?;
            fuzzer.run(handler.as_mut())
        }
    }
}

/// Fuzz every job on a pool of `cores` threads. Each thread pulls the next job
/// off a shared queue when it becomes free. Results come back in job order.
pub fn run_batch(
    jobs: Vec<Job>,
    options: BatchOptions,
    runner: Arc<dyn Runner>,
    make_state: StateFactory,
    stats: Arc<Mutex<Statistics>>,
) -> Vec<(String, Result<FuzzResult, FuzzError>)> {
    let total = jobs.len() as u64;
    let queue: Arc<Mutex<VecDeque<(usize, Job)>>> =
        Arc::new(Mutex::new(jobs.into_iter().enumerate().collect()));
    let results: Arc<Mutex<Vec<JobResult>>> = Arc::new(Mutex::new(Vec::new()));

    let mut threads = Vec::new();
    for i in 0..options.cores.max(1) {
        let queue = queue.clone();
        let results = results.clone();
        let stats = stats.clone();
        let runner = runner.clone();
        let make_state = make_state.clone();
        let options = options.clone();
        threads.push(thread::spawn(move || loop {
            let next = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => None,
            };
            let Some((idx, job)) = next else {
                break;
            };
            info!("worker {} fuzzing {}", i, job.name());
            let mut config = options.config.clone();
            // unique seed per job
            config.seed = config.seed.wrapping_add(idx as u64);
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_job(&job, config, runner.clone(), make_state(), options.workspace.as_ref())
            }))
            .unwrap_or_else(|payload| Err(FuzzError::Worker(panic_message(payload.as_ref()))));
            match &result {
                Ok(result) => {
                    if let Ok(mut stats) = stats.lock() {
                        stats.merge(&result.stats);
                    }
                }
                Err(e) => {
                    error!("{}: {}", job.name(), e);
                    if let Ok(mut stats) = stats.lock() {
                        stats.threads_finished += 1;
                    }
                }
            }
            if let Ok(mut results) = results.lock() {
                results.push((idx, job.name().to_string(), result));
            }
        }));
    }

    monitor(&stats, total, options.logs);
    for thread in threads {
        let _ = thread.join();
    }

    let mut results = match Arc::try_unwrap(results) {
        Ok(results) => results.into_inner().unwrap_or_default(),
        Err(shared) => shared.lock().map(|mut r| std::mem::take(&mut *r)).unwrap_or_default(),
    };
    results.sort_by_key(|(idx, _, _)| *idx);
    results
        .into_iter()
        .map(|(_, name, result)| (name, result))
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Print aggregated statistics every second until `total` runs have finished
pub fn monitor(stats: &Arc<Mutex<Statistics>>, total: u64, logs: bool) {
    let start_time = Instant::now();
    let mut log = if logs {
        match File::create("fuzz_stats.txt") {
            Ok(file) => Some(file),
            Err(e) => {
                error!("cannot create fuzz_stats.txt: {}", e);
                None
            }
        }
    } else {
        None
    };

    loop {
        thread::sleep(Duration::from_millis(1000));
        let uptime = start_time.elapsed().as_secs_f64();
        let Ok(stats) = stats.lock() else {
            break;
        };
        println!(
            "{:12.2} uptime | {:4}/{:4} runs | {}",
            uptime, stats.threads_finished, total, stats
        );
        if let Some(ref mut file) = log {
            let line = format!(
                "{:12.0} {:9} {:8} {:6} {:6} {:6}\n",
                uptime,
                stats.fuzz_cases,
                stats.coverage,
                stats.corpus,
                stats.violations,
                stats.unique_violations
            );
            if file.write_all(line.as_bytes()).and_then(|_| file.flush()).is_err() {
                log = None;
            }
        }
        if stats.threads_finished >= total {
            break;
        }
    }
}
