use anyhow::Result;

use crate::commands::{CommandReport, load_runtime};
use crate::fold::collector::Collector;
use crate::fold::watcher::run_collect;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("collect");
    let (paths, _cfg) = load_runtime()?;
    let collector = Collector::new(&paths.batches_dir);

    let Some(outcome) = run_collect(&paths, &collector) else {
        report.issue("collection failed; sources left in place for the next pass");
        return Ok(report);
    };

    report.detail(format!("collected={}", outcome.collected));
    report.detail(format!("files_processed={}", outcome.files_processed));
    report.detail(format!("events={}", outcome.events));
    report.detail(format!("deferred_files={}", outcome.deferred_files));
    report.detail(format!("split_files={}", outcome.split_files));
    for day in &outcome.days {
        report.detail(format!("day={day}"));
    }
    for name in &outcome.unreadable_files {
        report.issue(format!("unreadable batch file {name}"));
    }
    for name in &outcome.undeleted_files {
        report.issue(format!("merged but not deleted {name}"));
    }
    Ok(report)
}
