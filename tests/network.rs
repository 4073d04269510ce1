mod common;

use std::{fs, sync::Arc, time::Duration};

use gecko_fuzzer::{
    fuzzer::{FuzzConfig, FuzzError},
    network::{
        miner::Miner,
        onboard::{download_project, onboard},
        oracle_id,
        validator::Validator,
        BlobStore, JsonRegistry, MemoryBlobStore, ProjectInfo, ProjectRegistry, Vote,
    },
    replay::ProjectBundle,
    runner::{EvmRunner, Runner},
};

use common::{safe, wallet};

fn runner() -> Arc<dyn Runner> {
    Arc::new(EvmRunner::default())
}

fn config() -> FuzzConfig {
    FuzzConfig {
        seed: 21,
        iterations: Some(300),
        epoch_size: 100,
        uint_cap: 4,
        ..FuzzConfig::default()
    }
}

fn write_project(dir: &std::path::Path, name: &str, init_code: &[u8], abi_json: &str) {
    fs::write(dir.join(format!("{}.bin", name)), hex::encode(init_code)).unwrap();
    fs::write(dir.join(format!("{}.abi", name)), abi_json).unwrap();
}

#[tokio::test]
async fn test_onboard_uploads_clean_project() {
    let dir = tempfile::tempdir().unwrap();
    let (target, abi_json) = safe();
    write_project(dir.path(), "safe", &target.init_code, &abi_json);

    let blobs = MemoryBlobStore::new();
    let token = onboard(dir.path(), &blobs, runner(), config()).await.unwrap();
    assert_eq!(token.oracles, vec!["echidna_unreachable"]);
    assert_eq!(blobs.len(), 2);

    let (restored, testcases) = download_project(&blobs, &token.f, "safe").await.unwrap();
    assert_eq!(restored.init_code, target.init_code);
    assert_eq!(restored.abi.methods.len(), 1);
    assert!(!testcases.is_empty());
}

#[tokio::test]
async fn test_onboard_rejects_violated_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let (target, abi_json) = wallet();
    write_project(dir.path(), "wallet", &target.init_code, &abi_json);

    let blobs = MemoryBlobStore::new();
    let err = onboard(dir.path(), &blobs, runner(), config()).await.unwrap_err();
    assert!(matches!(err, FuzzError::Rejected(ref names) if names == &vec!["echidna_never_zero".to_string()]));
    assert!(blobs.is_empty());
}

/// Registry with the wallet project, half of the base reward on its oracle
async fn network() -> (Arc<JsonRegistry>, Arc<MemoryBlobStore>) {
    let blobs = Arc::new(MemoryBlobStore::new());
    let (target, abi_json) = wallet();
    let bundle = ProjectBundle::new(&abi_json, &target.init_code, vec![]);
    let bundle_cid = blobs.put(bundle.to_hex().unwrap().as_bytes()).await.unwrap();
    let splittings_cid = blobs.put(br#"{"echidna_never_zero": 0.5}"#).await.unwrap();

    let registry = Arc::new(JsonRegistry::in_memory());
    registry
        .add_project(ProjectInfo {
            ipfs_hash: bundle_cid,
            base_reward: 1000,
            splittings_cid,
            status: 0,
        })
        .unwrap();
    (registry, blobs)
}

#[tokio::test]
async fn test_miner_mints_and_validator_approves() {
    let (registry, blobs) = network().await;
    let mut miner = Miner::new(
        registry.clone(),
        blobs.clone(),
        runner(),
        config(),
        Duration::from_millis(10),
    );
    let report = miner.mine_once().await.unwrap().unwrap();
    assert_eq!(report.project_id, 0);
    assert_eq!(report.minted, vec![1]);

    let events = registry.mint_events(0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reward, 500);
    assert_eq!(events[0].oracle_id, oracle_id("echidna_never_zero"));

    // the same oracle is never submitted twice
    let again = miner.mine_once().await.unwrap().unwrap();
    assert!(again.minted.is_empty());

    let mut validator = Validator::new(
        registry.clone(),
        blobs.clone(),
        runner(),
        config(),
        Duration::from_millis(10),
    );
    assert_eq!(validator.validate_once().await.unwrap(), vec![(1, Vote::Aye)]);
    assert!(validator.validate_once().await.unwrap().is_empty());
    assert_eq!(registry.votes(1).unwrap(), vec![Vote::Aye]);
}

#[tokio::test]
async fn test_validator_rejects_wrong_claims() {
    let (registry, blobs) = network().await;
    let mut miner = Miner::new(
        registry.clone(),
        blobs.clone(),
        runner(),
        config(),
        Duration::from_millis(10),
    );
    miner.mine_once().await.unwrap();
    let finding = registry.mint_events(0).await.unwrap()[0].ipfs_hash.clone();

    // inflated reward, then a claim for another oracle
    let inflated = registry
        .mint(0, &finding, 999, oracle_id("echidna_never_zero"))
        .await
        .unwrap();
    let mislabeled = registry.mint(0, &finding, 500, oracle_id("echidna_other")).await.unwrap();

    let mut validator = Validator::new(registry.clone(), blobs, runner(), config(), Duration::from_millis(10));
    let votes = validator.validate_once().await.unwrap();
    assert!(votes.contains(&(1, Vote::Aye)));
    assert!(votes.contains(&(inflated, Vote::Nay)));
    assert!(votes.contains(&(mislabeled, Vote::Nay)));

    // frozen oracles are left alone
    registry.freeze_oracle(0, "echidna_never_zero").unwrap();
    registry.mint(0, &finding, 500, oracle_id("echidna_never_zero")).await.unwrap();
    assert!(validator.validate_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_miner_waits_without_active_project() {
    let registry = Arc::new(JsonRegistry::in_memory());
    let blobs = Arc::new(MemoryBlobStore::new());
    registry
        .add_project(ProjectInfo {
            ipfs_hash: "missing".to_string(),
            base_reward: 1,
            splittings_cid: "missing".to_string(),
            status: 1,
        })
        .unwrap();
    let mut miner = Miner::new(registry, blobs, runner(), config(), Duration::from_millis(1));
    assert!(miner.mine_once().await.unwrap().is_none());
}
