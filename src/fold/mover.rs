//! Raw touch events: the live queue producers append to, and the staging
//! area `processBatch` drains it into.

use crate::fold::batch::{BatchEntry, BatchEvent, NO_BRANCH};
use crate::fold::spool::{SpoolNamer, list_sorted};
use crate::fold::util::{move_file, remove_file_if_exists};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub directory: String,
    pub filename: String,
    pub git_branch: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Producer side of the live queue.
#[derive(Debug)]
pub struct TouchQueue {
    dir: PathBuf,
    namer: SpoolNamer,
}

impl TouchQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            namer: SpoolNamer::default(),
        }
    }

    pub fn append(&self, entry: &QueueEntry) -> Result<String> {
        let body = serde_json::to_vec(entry).context("failed to serialize queue entry")?;
        self.namer.write_new(&self.dir, &body)
    }
}

#[derive(Debug, Clone)]
pub struct StagedEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub entry: QueueEntry,
}

#[derive(Debug, Clone, Default)]
pub struct StagedRead {
    pub entries: Vec<StagedEntry>,
    /// Staged files that did not parse, moved aside to the reject dir.
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueueMover {
    queue_dir: PathBuf,
    staging_dir: PathBuf,
    reject_dir: PathBuf,
}

impl QueueMover {
    pub fn new(
        queue_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        reject_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            staging_dir: staging_dir.into(),
            reject_dir: reject_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Rename every live queue file into staging. Returns how many moved.
    pub fn stage_all(&self) -> Result<usize> {
        move_all(&self.queue_dir, &self.staging_dir)
    }

    /// Put staged files back into the live queue.
    pub fn rollback(&self) -> Result<usize> {
        move_all(&self.staging_dir, &self.queue_dir)
    }

    pub fn staged_count(&self) -> Result<usize> {
        Ok(list_sorted(&self.staging_dir)?.len())
    }

    /// Read staged entries in filename order.
    pub fn read_staged(&self) -> Result<StagedRead> {
        let mut out = StagedRead::default();
        for (file_name, path) in list_sorted(&self.staging_dir)? {
            let parsed = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))
                .and_then(|raw| {
                    serde_json::from_str::<QueueEntry>(&raw)
                        .with_context(|| format!("failed to parse {}", path.display()))
                });
            match parsed {
                Ok(entry) => out.entries.push(StagedEntry {
                    file_name,
                    path,
                    entry,
                }),
                Err(err) => {
                    eprintln!("timefold mover: rejecting staged entry: {err:#}");
                    move_file(&path, &self.reject_dir.join(&file_name))?;
                    out.rejected.push(file_name);
                }
            }
        }
        Ok(out)
    }

    /// Best-effort delete; returns the names that could not be removed.
    pub fn delete_staged(&self, entries: &[StagedEntry]) -> Vec<String> {
        let mut failed = Vec::new();
        for staged in entries {
            if let Err(err) = remove_file_if_exists(&staged.path) {
                eprintln!("timefold mover: {err:#}");
                failed.push(staged.file_name.clone());
            }
        }
        failed
    }
}

/// Group staged entries by branch then directory, keeping read order.
pub fn group_entries(entries: &[StagedEntry]) -> BatchEntry {
    let mut batch = BatchEntry::new();
    for staged in entries {
        let branch = staged
            .entry
            .git_branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(NO_BRANCH);
        batch.push(
            branch,
            &staged.entry.directory,
            BatchEvent {
                file: staged.entry.filename.clone(),
                timestamp: staged.entry.timestamp,
            },
        );
    }
    batch
}

fn move_all(from: &Path, to: &Path) -> Result<usize> {
    let files = list_sorted(from)?;
    if files.is_empty() {
        return Ok(0);
    }
    fs::create_dir_all(to).with_context(|| format!("failed to create {}", to.display()))?;
    let mut moved = 0usize;
    for (name, path) in files {
        move_file(&path, &to.join(&name))?;
        moved += 1;
    }
    Ok(moved)
}
