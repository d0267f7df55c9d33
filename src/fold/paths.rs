use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

/// Filesystem layout shared by the processor, the collector and the CLI.
///
/// `data_dir` is the committed tree; everything under `spool_dir` is local
/// working state that never reaches the committer.
#[derive(Debug, Clone)]
pub struct TimefoldPaths {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub batches_dir: PathBuf,
    pub spool_dir: PathBuf,
    pub requests_dir: PathBuf,
    pub queue_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub lock_file: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl TimefoldPaths {
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let data_dir = home.join("data");
        let spool_dir = home.join("spool");
        let logs_dir = home.join("logs");
        Self::from_parts(home, data_dir, spool_dir, logs_dir)
    }

    fn from_parts(home: PathBuf, data_dir: PathBuf, spool_dir: PathBuf, logs_dir: PathBuf) -> Self {
        Self {
            batches_dir: data_dir.join("batches"),
            requests_dir: spool_dir.join("requests"),
            queue_dir: spool_dir.join("queue"),
            staging_dir: spool_dir.join("queue_staging"),
            backup_dir: spool_dir.join("backup"),
            lock_file: spool_dir.join("data.lock"),
            state_dir: spool_dir.join("state"),
            home,
            data_dir,
            spool_dir,
            logs_dir,
        }
    }

    /// Quarantine target for touch files that could not be parsed.
    pub fn queue_backup_dir(&self) -> PathBuf {
        self.backup_dir.join("queue")
    }

    pub fn daemon_lock_file(&self) -> PathBuf {
        self.state_dir.join("timefold-watch.daemon.lock")
    }
}

pub fn day_file(batches_dir: &Path, year: i32, month: u32, day: u32) -> PathBuf {
    batches_dir
        .join(format!("{year:04}"))
        .join(format!("{month:02}"))
        .join(format!("{day:02}.json"))
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_home() -> Result<PathBuf> {
    let home = required_home_dir()?;
    Ok(env_or_default_path("TIMEFOLD_HOME", home.join(".timefold")))
}

pub fn resolve_paths() -> Result<TimefoldPaths> {
    let home = resolve_home()?;
    let data_dir = env_or_default_path("TIMEFOLD_DATA_DIR", home.join("data"));
    let spool_dir = env_or_default_path("TIMEFOLD_SPOOL_DIR", home.join("spool"));
    let logs_dir = env_or_default_path("TIMEFOLD_LOGS_DIR", home.join("logs"));
    Ok(TimefoldPaths::from_parts(home, data_dir, spool_dir, logs_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_file_is_zero_padded() {
        let paths = TimefoldPaths::under("/tf");
        assert_eq!(
            day_file(&paths.batches_dir, 2024, 3, 7),
            PathBuf::from("/tf/data/batches/2024/03/07.json")
        );
    }

    #[test]
    fn spool_dirs_live_outside_the_committed_tree() {
        let paths = TimefoldPaths::under("/tf");
        assert!(!paths.requests_dir.starts_with(&paths.data_dir));
        assert!(!paths.lock_file.starts_with(&paths.data_dir));
        assert!(paths.batches_dir.starts_with(&paths.data_dir));
    }
}
