use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{join_fuzz, spawn_fuzz, BlobStore};
use crate::{
    fuzzer::{handler::NoopHandler, AbiTarget, FuzzConfig, FuzzError},
    json::json_parser::parse_abi,
    replay::{ProjectBundle, ReplayRecord},
    runner::Runner,
};

/// What the web UI needs to register a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardToken {
    /// Content id of the project bundle
    pub f: String,
    /// Content id of the testcase list
    pub tc: String,
    pub oracles: Vec<String>,
}

impl OnboardToken {
    pub fn to_base64(&self) -> Result<String, FuzzError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }
}

#[derive(Serialize)]
struct TestcaseList<'a> {
    a: &'a [String],
}

/// The single `<prefix>.bin` / `<prefix>.abi` pair of `dir`
pub fn find_project(dir: &Path) -> Result<(PathBuf, PathBuf), FuzzError> {
    let mut bins = Vec::new();
    let mut abis = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") => bins.push(path),
            Some("abi") => abis.push(path),
            _ => {}
        }
    }
    if bins.len() != 1 || abis.len() != 1 {
        return Err(FuzzError::Config(format!(
            "only one (bin, abi) pair is supported, found {} .bin and {} .abi in {}",
            bins.len(),
            abis.len(),
            dir.display()
        )));
    }
    let (bin, abi) = (bins.remove(0), abis.remove(0));
    if bin.file_stem() != abi.file_stem() {
        return Err(FuzzError::Config(format!(
            "prefix mismatch between {} and {}",
            bin.display(),
            abi.display()
        )));
    }
    Ok((bin, abi))
}

/// Load a contract from its hex `.bin` and JSON `.abi` files.
/// Returns the target and the raw ABI text.
pub fn load_target(name: &str, bin: &Path, abi: &Path) -> Result<(AbiTarget, String), FuzzError> {
    let bin_text = fs::read_to_string(bin)?;
    let bin_text = bin_text.trim();
    let init_code = hex::decode(bin_text.strip_prefix("0x").unwrap_or(bin_text))
        .map_err(|e| FuzzError::Config(format!("{}: {}", bin.display(), e)))?;
    let abi_json = fs::read_to_string(abi)?;
    let target = AbiTarget {
        name: name.to_string(),
        init_code,
        abi: parse_abi(&abi_json)?,
    };
    Ok((target, abi_json))
}

/// Rebuild a project from its bundle content id
pub async fn download_project(
    blobs: &dyn BlobStore,
    cid: &str,
    name: &str,
) -> Result<(AbiTarget, Vec<ReplayRecord>), FuzzError> {
    let raw = blobs.get(cid).await?;
    let bundle = ProjectBundle::from_hex(&String::from_utf8_lossy(&raw))?;
    let target = AbiTarget {
        name: name.to_string(),
        init_code: bundle.init_code()?,
        abi: parse_abi(&bundle.abi()?)?,
    };
    let testcases = bundle
        .t
        .iter()
        .filter_map(|t| match ReplayRecord::from_json(t) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("dropping bundled testcase: {}", e);
                None
            }
        })
        .collect();
    Ok((target, testcases))
}

/// Fuzz the project of `dir` briefly, refuse it if an oracle breaks, then
/// upload its bundle and testcases
pub async fn onboard(
    dir: &Path,
    blobs: &dyn BlobStore,
    runner: Arc<dyn Runner>,
    config: FuzzConfig,
) -> Result<OnboardToken, FuzzError> {
    let (bin, abi) = find_project(dir)?;
    let name = bin
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let (target, abi_json) = load_target(&name, &bin, &abi)?;
    let oracles: Vec<String> = target.abi.oracles.iter().map(|m| m.name.clone()).collect();
    let init_code = target.init_code.clone();

    info!("fuzzing {} to find low hanging fruits", name);
    let result = join_fuzz(spawn_fuzz(target, vec![], config, runner, Box::new(NoopHandler))).await?;
    if !result.violations.is_empty() {
        return Err(FuzzError::Rejected(result.violations.keys().cloned().collect()));
    }

    let testcases = result
        .testcases
        .iter()
        .map(ReplayRecord::to_json)
        .collect::<Result<Vec<String>, FuzzError>>()?;
    let bundle = ProjectBundle::new(&abi_json, &init_code, testcases.clone());
    let f = blobs.put(bundle.to_hex()?.as_bytes()).await?;
    let tc = blobs
        .put(&serde_json::to_vec(&TestcaseList { a: &testcases })?)
        .await?;
    info!("uploaded project {} and {} testcases as {}", f, testcases.len(), tc);

    Ok(OnboardToken { f, tc, oracles })
}
