use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use log::warn;

use super::error::FuzzError;
use crate::replay::ReplayRecord;

pub fn timestamp() -> String {
    let datetime = DateTime::<Utc>::from(SystemTime::now());
    datetime.format("%Y-%m-%d--%H:%M:%S").to_string()
}

/// Write `record` to `<dir>/<file_name>`, creating `dir` as needed
pub fn write_record(dir: &Path, file_name: &str, record: &ReplayRecord) -> Result<PathBuf, FuzzError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let mut file = File::create(&path)?;
    file.write_all(record.to_json()?.as_bytes())?;
    Ok(path)
}

pub fn write_violationfile(dir: &Path, oracle: &str, record: &ReplayRecord) -> Result<PathBuf, FuzzError> {
    write_record(dir, &format!("{}.json", oracle), record)
}

pub fn write_testcasefile(dir: &Path, counter: usize, record: &ReplayRecord) -> Result<PathBuf, FuzzError> {
    write_record(dir, &format!("{}-{}.json", timestamp(), counter), record)
}

/// Load every `*.json` replay record of `dir` in file name order.
/// Unreadable files are skipped with a warning.
pub fn load_testcases(dir: &Path) -> Result<Vec<ReplayRecord>, FuzzError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        match fs::read_to_string(&path)
            .map_err(FuzzError::from)
            .and_then(|data| ReplayRecord::from_json(&data))
        {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping testcase {}: {}", path.display(), e),
        }
    }
    Ok(records)
}
