use anyhow::Result;
use chrono::NaiveDate;
use std::env;
use std::path::Path;

use crate::GENERATED_ENV_ALLOWLIST;
use crate::commands::{CommandReport, load_runtime};
use crate::fold::audit;
use crate::fold::collector::Collector;
use crate::fold::lock::DataLock;
use crate::fold::mover::QueueMover;
use crate::fold::request_store::RequestStore;
use crate::fold::spool::list_sorted;
use crate::fold::state;
use crate::fold::util::now_epoch_millis;
use crate::fold::watcher::read_daemon_lock;

fn day_or_never(day: Option<NaiveDate>) -> String {
    day.map(|d| d.to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn count_in(dir: &Path) -> Result<usize> {
    Ok(list_sorted(dir)?.len())
}

pub fn run() -> Result<CommandReport> {
    let (paths, cfg) = load_runtime()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("data_dir={}", paths.data_dir.display()));
    report.detail(format!("spool_dir={}", paths.spool_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("committer={}", cfg.committer.kind));

    let pending = RequestStore::new(&paths.requests_dir).pending_count()?;
    report.detail(format!("requests.pending={pending}"));
    report.detail(format!("queue.entries={}", count_in(&paths.queue_dir)?));
    let mover = QueueMover::new(
        &paths.queue_dir,
        &paths.staging_dir,
        paths.queue_backup_dir(),
    );
    let staged = mover.staged_count()?;
    report.detail(format!("queue.staged={staged}"));
    report.detail(format!("backup.requests={}", count_in(&paths.backup_dir)?));
    report.detail(format!(
        "backup.queue_entries={}",
        count_in(&paths.queue_backup_dir())?
    ));
    let transient = Collector::new(&paths.batches_dir).transient_files()?;
    report.detail(format!("batches.transient={}", transient.len()));

    // Staged entries outside a drain mean a crash between stage and rollback.
    if staged > 0 {
        report.issue(format!(
            "{staged} queue entries stuck in {}; the next processBatch picks them up",
            paths.staging_dir.display()
        ));
    }

    let lock = DataLock::new(&paths.lock_file, cfg.processor.lock_max_hold());
    match lock.inspect()? {
        Some(record) => {
            let expired = record.is_expired(now_epoch_millis()?);
            report.detail(format!(
                "data_lock.pid={} data_lock.expired={expired}",
                record.pid
            ));
        }
        None => report.detail("data_lock=free"),
    }

    match read_daemon_lock(&paths.daemon_lock_file()) {
        Ok(Some(record)) => report.detail(format!(
            "daemon.pid={} daemon.build={} daemon.started={}",
            record.pid, record.build_uuid, record.start_time
        )),
        Ok(None) => report.detail("daemon=not-running"),
        Err(err) => report.issue(format!("daemon lock unreadable: {err:#}")),
    }

    let current = state::load(&paths)?;
    report.detail(format!(
        "state.last_housekeeping_day={}",
        day_or_never(current.last_housekeeping_day)
    ));
    report.detail(format!("state.last_commit_day={}", day_or_never(current.last_commit_day)));
    if let Some(secs) = current.last_drain_epoch_secs {
        report.detail(format!("state.last_drain_epoch_secs={secs}"));
    }
    if let Some(secs) = current.last_collect_epoch_secs {
        report.detail(format!("state.last_collect_epoch_secs={secs}"));
    }

    match audit::read_events(&paths) {
        Ok(events) => {
            if let Some(last) = events.last() {
                report.detail(format!(
                    "audit.last={}/{} at_epoch_secs={}",
                    last.phase, last.status, last.at_epoch_secs
                ));
            }
        }
        Err(err) => report.issue(format!("audit log unreadable: {err:#}")),
    }

    for key in GENERATED_ENV_ALLOWLIST {
        if env::var_os(key).is_some() {
            report.detail(format!("env.{key}=set"));
        }
    }

    Ok(report)
}
