use crate::fold::audit;
use crate::fold::config::CommitterConfig;
use crate::fold::paths::TimefoldPaths;
use crate::fold::state;
use crate::fold::util::run_command_with_optional_timeout;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

/// Durable, versioned persistence of the data directory.
pub trait Committer: Send + Sync {
    /// Returns `false` when there was nothing to record.
    fn commit(&self, message: &str) -> Result<bool>;
    /// Whether the most recent commit was the first of the current UTC day.
    /// Only meaningful right after a `commit` that returned `true`.
    fn is_first_commit_today(&self) -> Result<bool>;
    fn housekeeping(&self) -> Result<()>;
}

pub fn build_committer(cfg: &CommitterConfig, paths: &TimefoldPaths) -> Result<Arc<dyn Committer>> {
    match cfg.kind.as_str() {
        "local" => Ok(Arc::new(LocalCommitter::new(paths.clone()))),
        _ => {
            let git_bin = resolve_git_bin(cfg.git_bin.as_deref())?;
            Ok(Arc::new(GitCommitter::new(&paths.data_dir, git_bin)))
        }
    }
}

fn resolve_git_bin(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(bin) = configured.map(str::trim).filter(|b| !b.is_empty()) {
        return Ok(PathBuf::from(bin));
    }
    which::which("git").context("git binary not found on PATH; set TIMEFOLD_GIT_BIN")
}

fn utc_midnight(day: NaiveDate) -> String {
    format!("{}T00:00:00Z", day.format("%Y-%m-%d"))
}

#[derive(Debug, Clone)]
pub struct GitCommitter {
    repo_dir: PathBuf,
    git_bin: PathBuf,
}

impl GitCommitter {
    pub fn new(repo_dir: &Path, git_bin: PathBuf) -> Self {
        Self {
            repo_dir: repo_dir.to_path_buf(),
            git_bin,
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg("-C").arg(&self.repo_dir).args(args);
        let output = run_command_with_optional_timeout(&mut cmd, None)
            .with_context(|| format!("failed to run git {}", args.join(" ")))?;
        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn ensure_repo(&self) -> Result<()> {
        if self.repo_dir.join(".git").exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.repo_dir)
            .with_context(|| format!("failed to create {}", self.repo_dir.display()))?;
        self.git(&["init", "--quiet"])?;
        Ok(())
    }

    fn identity_args(&self) -> Vec<&'static str> {
        let configured = self
            .git(&["config", "user.email"])
            .map(|out| !out.trim().is_empty())
            .unwrap_or(false);
        if configured {
            Vec::new()
        } else {
            vec!["-c", "user.name=timefold", "-c", "user.email=timefold@localhost"]
        }
    }
}

impl Committer for GitCommitter {
    fn commit(&self, message: &str) -> Result<bool> {
        self.ensure_repo()?;
        self.git(&["add", "-A"])?;
        if self.git(&["status", "--porcelain"])?.trim().is_empty() {
            return Ok(false);
        }
        let mut args: Vec<&str> = self.identity_args();
        args.extend(["commit", "--quiet", "-m", message]);
        self.git(&args)?;
        Ok(true)
    }

    fn is_first_commit_today(&self) -> Result<bool> {
        self.ensure_repo()?;
        let since = format!("--since={}", utc_midnight(Utc::now().date_naive()));
        // A repository without commits makes `git log` fail; that is "no".
        let Ok(log) = self.git(&["log", &since, "--format=%H"]) else {
            return Ok(false);
        };
        Ok(log.lines().filter(|l| !l.trim().is_empty()).count() == 1)
    }

    fn housekeeping(&self) -> Result<()> {
        self.ensure_repo()?;
        self.git(&["gc", "--auto", "--quiet"])?;
        Ok(())
    }
}

/// Committer without version control: commits are recorded in the audit log
/// and the last commit day in the state file.
#[derive(Debug)]
pub struct LocalCommitter {
    paths: TimefoldPaths,
    last_was_first_today: Mutex<bool>,
}

impl LocalCommitter {
    pub fn new(paths: TimefoldPaths) -> Self {
        Self {
            paths,
            last_was_first_today: Mutex::new(false),
        }
    }
}

impl Committer for LocalCommitter {
    fn commit(&self, message: &str) -> Result<bool> {
        let today = Utc::now().date_naive();
        let previous = state::load(&self.paths)?.last_commit_day;
        state::update(&self.paths, |s| s.last_commit_day = Some(today))?;
        audit::append_event(&self.paths, "commit", "ok", message)?;
        let mut flag = self
            .last_was_first_today
            .lock()
            .map_err(|_| anyhow::anyhow!("committer mutex poisoned"))?;
        *flag = previous != Some(today);
        Ok(true)
    }

    fn is_first_commit_today(&self) -> Result<bool> {
        let flag = self
            .last_was_first_today
            .lock()
            .map_err(|_| anyhow::anyhow!("committer mutex poisoned"))?;
        Ok(*flag)
    }

    fn housekeeping(&self) -> Result<()> {
        audit::append_event(&self.paths, "commit-housekeeping", "ok", "local committer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_committer_reports_first_commit_once_per_day() {
        let tmp = tempdir().expect("tempdir");
        let committer = LocalCommitter::new(TimefoldPaths::under(tmp.path()));
        assert!(!committer.is_first_commit_today().expect("before"));

        assert!(committer.commit("one").expect("commit"));
        assert!(committer.is_first_commit_today().expect("first"));
        committer.commit("two").expect("commit");
        assert!(!committer.is_first_commit_today().expect("second"));
    }

    #[test]
    fn utc_midnight_is_rfc3339() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).expect("date");
        assert_eq!(utc_midnight(day), "2024-05-01T00:00:00Z");
    }

    #[test]
    fn configured_git_bin_wins_over_path_lookup() {
        let bin = resolve_git_bin(Some(" /opt/git/bin/git ")).expect("resolve");
        assert_eq!(bin, PathBuf::from("/opt/git/bin/git"));
    }
}
