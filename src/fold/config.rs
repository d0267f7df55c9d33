use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TimefoldError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub poll_interval_secs: u64,
    pub max_failures: u32,
    pub lock_timeout_ms: u64,
    #[serde(default = "default_lock_max_hold_secs")]
    pub lock_max_hold_secs: u64,
}

fn default_lock_max_hold_secs() -> u64 {
    60
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_failures: 5,
            lock_timeout_ms: 1_000,
            lock_max_hold_secs: default_lock_max_hold_secs(),
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_max_hold(&self) -> Duration {
        Duration::from_secs(self.lock_max_hold_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitterConfig {
    /// `git` or `local`.
    pub kind: String,
    #[serde(default)]
    pub git_bin: Option<String>,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            kind: "git".to_string(),
            git_bin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimefoldConfig {
    pub processor: ProcessorConfig,
    pub collector: CollectorConfig,
    pub committer: CommitterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTimefoldConfig {
    processor: Option<ProcessorConfig>,
    collector: Option<CollectorConfig>,
    committer: Option<CommitterConfig>,
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn lookup_trimmed(env: EnvLookup<'_>, var: &str) -> Option<String> {
    env(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_u64(env: EnvLookup<'_>, var: &str, fallback: u64) -> u64 {
    lookup_trimmed(env, var)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn env_or_u32(env: EnvLookup<'_>, var: &str, fallback: u32) -> u32 {
    lookup_trimmed(env, var)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(fallback)
}

fn env_or_bool(env: EnvLookup<'_>, var: &str, fallback: bool) -> bool {
    match lookup_trimmed(env, var).as_deref() {
        Some("1" | "true" | "TRUE" | "yes" | "on") => true,
        Some("0" | "false" | "FALSE" | "no" | "off") => false,
        _ => fallback,
    }
}

fn env_or_string(env: EnvLookup<'_>, var: &str, fallback: &str) -> String {
    lookup_trimmed(env, var).unwrap_or_else(|| fallback.to_string())
}

fn validate(cfg: &TimefoldConfig) -> Result<()> {
    if cfg.processor.poll_interval_secs == 0 {
        return Err(anyhow!(
            "invalid processor poll interval: must be >= 1 second"
        ));
    }
    if cfg.processor.max_failures == 0 {
        return Err(anyhow!("invalid max failures: must be >= 1"));
    }
    if cfg.processor.lock_timeout_ms == 0 {
        return Err(anyhow!("invalid lock timeout: must be >= 1 ms"));
    }
    if cfg.processor.lock_max_hold_secs == 0 {
        return Err(anyhow!("invalid lock max hold: must be >= 1 second"));
    }
    if cfg.collector.interval_secs == 0 {
        return Err(anyhow!("invalid collector interval: must be >= 1 second"));
    }
    if cfg.committer.kind != "git" && cfg.committer.kind != "local" {
        return Err(anyhow!("invalid committer kind: use `git` or `local`"));
    }
    Ok(())
}

pub fn default_config_path(home: &Path) -> PathBuf {
    home.join("timefold.toml")
}

fn resolve_config_path(home: &Path, env: EnvLookup<'_>) -> PathBuf {
    match lookup_trimmed(env, "TIMEFOLD_CONFIG_PATH") {
        Some(custom) => PathBuf::from(custom),
        None => default_config_path(home),
    }
}

fn merge_file_config(base: &mut TimefoldConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| TimefoldError::InvalidConfig(format!("{}: {err}", path.display())))?;
    let parsed: PartialTimefoldConfig = toml::from_str(&raw)
        .map_err(|err| TimefoldError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if let Some(processor) = parsed.processor {
        base.processor = processor;
    }
    if let Some(collector) = parsed.collector {
        base.collector = collector;
    }
    if let Some(committer) = parsed.committer {
        base.committer = committer;
    }
    Ok(())
}

/// Defaults, then the TOML file, then `TIMEFOLD_*` env overrides.
pub fn load_config_with(home: &Path, env: EnvLookup<'_>) -> Result<TimefoldConfig> {
    let mut cfg = TimefoldConfig::default();
    merge_file_config(&mut cfg, &resolve_config_path(home, env))?;

    cfg.processor.poll_interval_secs = env_or_u64(
        env,
        "TIMEFOLD_POLL_INTERVAL_SECS",
        cfg.processor.poll_interval_secs,
    );
    cfg.processor.max_failures =
        env_or_u32(env, "TIMEFOLD_MAX_FAILURES", cfg.processor.max_failures);
    cfg.processor.lock_timeout_ms =
        env_or_u64(env, "TIMEFOLD_LOCK_TIMEOUT_MS", cfg.processor.lock_timeout_ms);
    cfg.processor.lock_max_hold_secs = env_or_u64(
        env,
        "TIMEFOLD_LOCK_MAX_HOLD_SECS",
        cfg.processor.lock_max_hold_secs,
    );
    cfg.collector.enabled = env_or_bool(env, "TIMEFOLD_COLLECT_ENABLED", cfg.collector.enabled);
    cfg.collector.interval_secs = env_or_u64(
        env,
        "TIMEFOLD_COLLECT_INTERVAL_SECS",
        cfg.collector.interval_secs,
    );
    cfg.committer.kind = env_or_string(env, "TIMEFOLD_COMMITTER", &cfg.committer.kind);
    if let Some(bin) = lookup_trimmed(env, "TIMEFOLD_GIT_BIN") {
        cfg.committer.git_bin = Some(bin);
    }

    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_config(home: &Path) -> Result<TimefoldConfig> {
    load_config_with(home, &|var| env::var(var).ok())
}
