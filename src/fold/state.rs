use crate::fold::paths::TimefoldPaths;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimefoldState {
    pub schema_version: u32,
    pub last_housekeeping_day: Option<NaiveDate>,
    pub last_commit_day: Option<NaiveDate>,
    pub last_drain_epoch_secs: Option<u64>,
    pub last_collect_epoch_secs: Option<u64>,
}

impl Default for TimefoldState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_housekeeping_day: None,
            last_commit_day: None,
            last_drain_epoch_secs: None,
            last_collect_epoch_secs: None,
        }
    }
}

pub fn state_file_path(paths: &TimefoldPaths) -> PathBuf {
    paths.state_dir.join("timefold_state.json")
}

pub fn load(paths: &TimefoldPaths) -> Result<TimefoldState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(TimefoldState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: TimefoldState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &TimefoldPaths, state: &TimefoldState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(&file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}

/// Load, apply `change`, save. Used for the small bookkeeping fields so each
/// caller does not re-implement the read-modify-write.
pub fn update<F>(paths: &TimefoldPaths, change: F) -> Result<TimefoldState>
where
    F: FnOnce(&mut TimefoldState),
{
    let mut state = load(paths)?;
    change(&mut state);
    save(paths, &state)?;
    Ok(state)
}
