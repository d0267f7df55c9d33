use anyhow::Result;

use crate::commands::{CommandReport, load_runtime};
use crate::fold::collector::Collector;
use crate::fold::committer::build_committer;
use crate::fold::processor::{Processor, TickOutcome};
use crate::fold::watcher::{self, run_collect};

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub daemon: bool,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    let (paths, cfg) = load_runtime()?;

    if opts.daemon {
        report.detail("starting timefold watcher in daemon mode");
        watcher::run_daemon(&paths, &cfg)?;
        return Ok(report);
    }

    // One processor tick followed by one collection pass.
    let committer = build_committer(&cfg.committer, &paths)?;
    let processor = Processor::new(paths.clone(), cfg.processor.clone(), committer);
    match watcher::run_tick(&processor) {
        Some(TickOutcome::Drained(drain)) => {
            report.detail(format!("processor.applied={}", drain.applied.len()));
            report.detail(format!("processor.failed={}", drain.failed.len()));
            report.detail(format!("processor.quarantined={}", drain.quarantined.len()));
        }
        Some(TickOutcome::LockUnavailable) => report.issue("processor.lock=unavailable"),
        Some(other) => report.detail(format!("processor.outcome={other:?}")),
        None => report.issue("processor tick failed"),
    }

    if cfg.collector.enabled {
        let collector = Collector::new(&paths.batches_dir);
        match run_collect(&paths, &collector) {
            Some(outcome) => {
                report.detail(format!("collector.collected={}", outcome.collected));
                report.detail(format!(
                    "collector.files_processed={}",
                    outcome.files_processed
                ));
            }
            None => report.issue("collector pass failed"),
        }
    }
    Ok(report)
}
