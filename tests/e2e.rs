mod common;

use std::sync::{Arc, Mutex};

use gecko_fuzzer::{
    fuzzer::{
        fuzzer::deploy_targets,
        handler::{DiskHandler, FindingHandler, NoopHandler},
        stats::Statistics,
        worker::{run_batch, BatchOptions, Job, StateFactory},
        AbiTarget, FuzzConfig, FuzzError, Fuzzer,
    },
    mutator::{mutate_args, AbiType, AbiValue},
    oracle::{OracleDetector, OracleRunner, TransferDetector, TRANSFER_VIOLATION},
    replay::{ReplayRecord, Replayer},
    runner::{ContractInfo, EvmRunner, Executor, Runner, TraceSink},
    state::{Address, AddressExt, StateBackend, WorldState},
};
use num_bigint::BigUint;
use rand::{rngs::StdRng, SeedableRng};

use common::{assemble, init_code, safe, sel, setter_target, square, wallet};

fn runner() -> Arc<dyn Runner> {
    Arc::new(EvmRunner::default())
}

fn config(seed: u64, iterations: u64) -> FuzzConfig {
    FuzzConfig {
        seed,
        iterations: Some(iterations),
        epoch_size: 100,
        ..FuzzConfig::default()
    }
}

/// Snapshot a fresh session starts from, contracts deployed
fn deployed(targets: &[AbiTarget]) -> (WorldState, Vec<ContractInfo>) {
    let mut state = WorldState::new();
    let mut executor = Executor::new(runner(), FuzzConfig::default().gas_limit);
    let contracts = deploy_targets(&mut executor, targets, &mut state).unwrap();
    (state, contracts)
}

#[derive(Default)]
struct Collect {
    violations: Vec<(String, ReplayRecord)>,
    testcases: usize,
}

impl FindingHandler for Collect {
    fn on_violation(&mut self, _: &ContractInfo, oracle: &str, record: &ReplayRecord) -> Result<(), FuzzError> {
        self.violations.push((oracle.to_string(), record.clone()));
        Ok(())
    }

    fn on_testcase(&mut self, _: &ContractInfo, _: &ReplayRecord) -> Result<(), FuzzError> {
        self.testcases += 1;
        Ok(())
    }
}

#[test]
fn test_never_zero_violation_replays() {
    let (target, _) = wallet();
    let (state, _) = deployed(std::slice::from_ref(&target));

    // seed transaction zeroing the balance
    let seed = ReplayRecord {
        method: "setBalance".to_string(),
        args: vec![r#"{"_max":10000,"v":0,"bits":256}"#.to_string()],
        sm: state.to_snapshot(),
        caller: Executor::deployer().to_base64(),
        idx: 0,
        data: None,
    };

    let mut fuzzer = Fuzzer::new(config(1, 1000), runner(), Box::new(OracleDetector));
    fuzzer.setup(std::slice::from_ref(&target), WorldState::new()).unwrap();
    let mut handler = Collect::default();
    fuzzer.load_testcases(&[seed], &mut handler).unwrap();
    let result = fuzzer.run(&mut handler).unwrap();

    assert_eq!(result.stats.fuzz_cases, 1000);
    assert!(!handler.violations.is_empty());
    assert!(handler.violations.iter().all(|(name, _)| name == "echidna_never_zero"));
    let record = result.violations.get("echidna_never_zero").unwrap();

    let mut replayer = Replayer::new(&FuzzConfig::default(), runner(), Box::new(OracleDetector));
    replayer.deploy(std::slice::from_ref(&target), WorldState::new()).unwrap();
    let outcome = replayer.rerun(record).unwrap();
    assert_eq!(outcome.oracle.as_deref(), Some("echidna_never_zero"));

    // replay is deterministic
    let record = ReplayRecord::from_json(&record.to_json().unwrap()).unwrap();
    assert_eq!(replayer.rerun(&record).unwrap(), outcome);
}

#[test]
fn test_squared_overflow_found_within_cap() {
    let (target, _) = square();
    let mut fuzzer = Fuzzer::new(config(7, 500), runner(), Box::new(OracleDetector));
    fuzzer.setup(&[target], WorldState::new()).unwrap();
    let result = fuzzer.run(&mut NoopHandler).unwrap();

    let record = result.violations.get("getXSquaredOverflow").unwrap();
    assert_eq!(record.method, "setX");
    let arg: serde_json::Value = serde_json::from_str(&record.args[0]).unwrap();
    let x = arg["v"].as_u64().unwrap();
    assert!((4096..10_000).contains(&x), "x = {}", x);
}

#[test]
fn test_tuple_seed_restores_and_mutates_one_field() {
    let pair = AbiType::parse("(uint8,uint8)").unwrap();
    let cap = BigUint::from(10_000u32);
    let serialized = serde_json::json!({
        "v": [5, 9],
        "objs": [
            r#"{"_max":256,"v":5,"bits":8}"#,
            r#"{"_max":256,"v":9,"bits":8}"#,
        ],
    })
    .to_string();

    let mut node = AbiValue::new(&pair, &cap);
    node.deserialize(&serialized).unwrap();
    assert_eq!(node.to_json(), serde_json::json!([5, 9]));

    let mut rng = StdRng::seed_from_u64(3);
    let mut moved = 0;
    for _ in 0..200 {
        let before = node.to_json();
        node.mutate(&mut rng);
        let after = node.to_json();
        let changed = (0..2usize).filter(|i| after[*i] != before[*i]).count();
        assert!(changed <= 1);
        moved += changed;
    }
    assert!(moved > 0);

    // a single argument list still has one node touched per call
    let mut args = vec![node.clone(), node];
    let before: Vec<serde_json::Value> = args.iter().map(AbiValue::to_json).collect();
    mutate_args(&mut args, &mut rng);
    let changed = args
        .iter()
        .zip(before.iter())
        .filter(|(arg, before)| arg.to_json() != **before)
        .count();
    assert!(changed <= 1);
}

fn three_oracles(third: &str) -> AbiTarget {
    setter_target(
        "Three",
        "set",
        &[
            ("echidna_a", "PUSH0"),
            ("echidna_b", "PUSH1 1"),
            ("echidna_c", third),
        ],
    )
    .0
}

#[test]
fn test_oracles_short_circuit() {
    for third in ["PUSH1 1", "PUSH0", "INVALID"] {
        let target = three_oracles(third);
        let (mut state, contracts) = deployed(&[target]);
        let executor = Executor::new(runner(), 1_000_000);
        let mut sink = TraceSink::new(false);
        let verdict = OracleRunner::new(&executor)
            .run_oracles(Executor::deployer(), &mut state, &contracts[0], &mut sink)
            .unwrap();
        assert!(verdict.violated);
        assert_eq!(verdict.oracle_name.as_deref(), Some("echidna_b"));
        assert_eq!(state.checkpoint_depth(), 0);
    }
}

#[test]
fn test_copy_isolation_and_revert_on_deployed_state() {
    let (target, _) = wallet();
    let (mut original, contracts) = deployed(&[target]);
    let address = contracts[0].address;
    let slot = original.get_storage(&address, &[0u8; 32]).unwrap();

    let mut copy = original.copy();
    let executor = Executor::new(runner(), 1_000_000);
    let mut sink = TraceSink::new(false);
    let mut calldata = hex::decode(&sel("setBalance(uint256)")[2..]).unwrap();
    calldata.extend([0u8; 31]);
    calldata.push(42);
    let tx = executor
        .run_transaction(Executor::deployer(), address, &calldata, &mut copy, &mut sink)
        .unwrap();
    assert!(!tx.reverted);
    assert_ne!(copy.get_storage(&address, &[0u8; 32]).unwrap(), slot);
    assert_eq!(original.get_storage(&address, &[0u8; 32]).unwrap(), slot);

    original.checkpoint();
    original.put_storage(&address, &[0u8; 32], vec![7]);
    original.revert();
    original.revert();
    assert_eq!(original.get_storage(&address, &[0u8; 32]).unwrap(), slot);
}

#[test]
fn test_coverage_never_shrinks() {
    let (target, _) = square();
    let mut fuzzer = Fuzzer::new(config(11, 300), runner(), Box::new(OracleDetector));
    fuzzer.setup(&[target], WorldState::new()).unwrap();
    let mut handler = Collect::default();
    let mut last = 0;
    for _ in 0..300 {
        fuzzer.fuzz_one(&mut handler).unwrap();
        let now = fuzzer.coverage().len();
        assert!(now >= last);
        last = now;
    }
    assert!(last > 0);
    assert_eq!(handler.testcases, fuzzer.corpus().len() - 1);
}

#[test]
fn test_safe_contract_has_no_violation() {
    let (target, _) = safe();
    let mut fuzzer = Fuzzer::new(config(5, 300), runner(), Box::new(OracleDetector));
    fuzzer.setup(&[target], WorldState::new()).unwrap();
    let result = fuzzer.run(&mut NoopHandler).unwrap();
    assert!(result.violations.is_empty());
    assert!(!result.testcases.is_empty());
}

/// `withdraw(uint256)` forwards the amount to a token `transfer`
fn vault_runtime() -> Vec<u8> {
    let source = format!(
        "PUSH0 CALLDATALOAD PUSH1 0xe0 SHR
         DUP1 PUSH4 {} EQ @withdraw JUMPI
         PUSH0 PUSH0 REVERT
         withdraw:
         PUSH4 0xa9059cbb PUSH1 0xe0 SHL PUSH0 MSTORE
         CALLER PUSH1 4 MSTORE
         PUSH1 4 CALLDATALOAD PUSH1 36 MSTORE
         PUSH0 PUSH0 PUSH1 68 PUSH0 PUSH0 PUSH2 0xbeef GAS CALL
         STOP",
        sel("withdraw(uint256)")
    );
    assemble(&source).code
}

#[test]
fn test_blackbox_detects_transfers() {
    let address = Address::from_low_u64(0xcafe);
    let mut state = WorldState::new();
    state.put_code(&address, vault_runtime());

    let mut config = config(9, 2000);
    config.max_violations = Some(3);
    let mut fuzzer = Fuzzer::new(config, runner(), Box::new(TransferDetector));
    fuzzer.setup_raw("vault", address, state).unwrap();
    let mut handler = Collect::default();
    let result = fuzzer.run(&mut handler).unwrap();

    assert_eq!(handler.violations.len(), 3);
    let record = result.violations.get(TRANSFER_VIOLATION).unwrap();
    assert_eq!(record.method, sel("withdraw(uint256)")[2..]);
    assert!(record.data.is_some());
}

#[test]
fn test_batch_persists_findings() {
    let workspace = tempfile::tempdir().unwrap();
    let jobs = vec![
        Job::Abi {
            name: "wallet".to_string(),
            targets: vec![wallet().0],
        },
        Job::Abi {
            name: "safe".to_string(),
            targets: vec![safe().0],
        },
    ];
    let mut engine = config(2, 400);
    engine.uint_cap = 4;
    let stats = Arc::new(Mutex::new(Statistics::default()));
    let make_state: StateFactory = Arc::new(WorldState::new);
    let results = run_batch(
        jobs,
        BatchOptions {
            cores: 2,
            config: engine,
            workspace: Some(workspace.path().to_path_buf()),
            logs: false,
        },
        runner(),
        make_state,
        stats.clone(),
    );

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "wallet");
    let wallet_result = results[0].1.as_ref().unwrap();
    assert!(wallet_result.violations.contains_key("echidna_never_zero"));
    assert!(workspace
        .path()
        .join("Wallet/violations/echidna_never_zero.json")
        .is_file());
    assert!(workspace.path().join("Safe/testcases").is_dir());

    let stats = stats.lock().unwrap();
    assert_eq!(stats.threads_finished, 2);
    assert_eq!(stats.fuzz_cases, 800);
}

#[test]
fn test_disk_handler_reload_restores_coverage() {
    let workspace = tempfile::tempdir().unwrap();
    let (target, _) = square();
    let mut fuzzer = Fuzzer::new(config(4, 200), runner(), Box::new(OracleDetector));
    fuzzer.setup(std::slice::from_ref(&target), WorldState::new()).unwrap();
    let mut disk = DiskHandler::new(workspace.path());
    fuzzer.run(&mut disk).unwrap();
    let coverage = fuzzer.coverage().len();

    let records =
        gecko_fuzzer::fuzzer::fuzzer_utils::load_testcases(&workspace.path().join("Square/testcases")).unwrap();
    assert!(!records.is_empty());
    let mut reloaded = Fuzzer::new(config(4, 0), runner(), Box::new(OracleDetector));
    reloaded.setup(&[target], WorldState::new()).unwrap();
    reloaded.load_testcases(&records, &mut NoopHandler).unwrap();
    assert_eq!(reloaded.coverage().len(), coverage);
}

#[test]
fn test_replay_rejects_ambiguous_method() {
    let runtime = assemble("STOP").code;
    let abi = r#"[
        {"type": "function", "name": "f", "inputs": [{"name": "a", "type": "uint8"}]},
        {"type": "function", "name": "f", "inputs": [{"name": "a", "type": "uint16"}]}
    ]"#;
    let target = AbiTarget {
        name: "Overloaded".to_string(),
        init_code: init_code(&[], &runtime),
        abi: gecko_fuzzer::json::json_parser::parse_abi(abi).unwrap(),
    };
    let mut replayer = Replayer::new(&FuzzConfig::default(), runner(), Box::new(OracleDetector));
    replayer.deploy(&[target], WorldState::new()).unwrap();
    let record = ReplayRecord {
        method: "f".to_string(),
        args: vec![r#"{"_max":256,"v":1,"bits":8}"#.to_string()],
        sm: WorldState::new().to_snapshot(),
        caller: Executor::deployer().to_base64(),
        idx: 0,
        data: None,
    };
    assert!(matches!(
        replayer.rerun(&record),
        Err(FuzzError::AmbiguousMethod(name, 2)) if name == "f"
    ));
}
