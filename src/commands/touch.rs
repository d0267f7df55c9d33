use anyhow::Result;
use chrono::Utc;

use crate::commands::{CommandReport, load_runtime};
use crate::fold::mover::{QueueEntry, TouchQueue};

#[derive(Debug, Clone)]
pub struct TouchOptions {
    pub directory: String,
    pub file: String,
    pub branch: Option<String>,
}

pub fn run(opts: &TouchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("touch");
    if opts.directory.trim().is_empty() || opts.file.trim().is_empty() {
        report.issue("both --directory and --file are required");
        return Ok(report);
    }

    let (paths, _cfg) = load_runtime()?;
    let entry = QueueEntry {
        directory: opts.directory.clone(),
        filename: opts.file.clone(),
        git_branch: opts.branch.clone(),
        timestamp: Utc::now(),
    };
    let file_name = TouchQueue::new(&paths.queue_dir).append(&entry)?;

    report.detail(format!("file={file_name}"));
    report.detail(format!("queue_dir={}", paths.queue_dir.display()));
    Ok(report)
}
