use anyhow::Result;

use crate::commands::{CommandReport, load_runtime};
use crate::fold::committer::build_committer;
use crate::fold::processor::{Processor, TickOutcome};

/// A single processor tick. Failure counts live only for this process, so
/// repeated `drain` runs never reach quarantine; the daemon does.
pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("drain");
    let (paths, cfg) = load_runtime()?;
    let committer = build_committer(&cfg.committer, &paths)?;
    let processor = Processor::new(paths, cfg.processor.clone(), committer);

    match processor.tick()? {
        TickOutcome::Busy => report.detail("outcome=busy"),
        TickOutcome::Idle => report.detail("outcome=idle"),
        TickOutcome::LockUnavailable => {
            report.issue("data lock held by another writer; nothing applied");
        }
        TickOutcome::Drained(drain) => {
            report.detail("outcome=drained");
            report.detail(format!("applied={}", drain.applied.len()));
            for note in &drain.notes {
                report.detail(format!("applied.{note}"));
            }
            for (name, attempt) in &drain.failed {
                report.issue(format!("failed request={name} attempt={attempt}"));
            }
            for name in &drain.quarantined {
                report.issue(format!("quarantined request={name}"));
            }
            for name in &drain.quarantine_failed {
                report.issue(format!("quarantine move failed request={name}"));
            }
            if let Some(name) = &drain.housekeeping_enqueued {
                report.detail(format!("housekeeping_enqueued={name}"));
            }
        }
    }
    Ok(report)
}
