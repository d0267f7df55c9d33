use crate::error::TimefoldErrorCode;
use crate::fold::audit;
use crate::fold::collector::{CollectOutcome, Collector};
use crate::fold::committer::build_committer;
use crate::fold::config::TimefoldConfig;
use crate::fold::paths::TimefoldPaths;
use crate::fold::processor::{Processor, TickOutcome};
use crate::fold::state;
use crate::fold::util::now_epoch_secs;
use crate::fold::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockRecord {
    pub pid: u32,
    pub build_uuid: String,
    pub start_time: String,
}

/// Held for the daemon's lifetime; the OS drops the `fs2` lock on exit.
pub struct DaemonInstance {
    _file: File,
}

pub fn acquire_daemon_lock(path: &Path) -> Result<DaemonInstance> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "{}: another timefold daemon holds {}",
            TimefoldErrorCode::E001Locked.as_str(),
            path.display()
        )
    })?;

    let record = DaemonLockRecord {
        pid: std::process::id(),
        build_uuid: env!("BUILD_UUID").to_string(),
        start_time: Utc::now().to_rfc3339(),
    };
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
    file.sync_all()?;
    Ok(DaemonInstance { _file: file })
}

pub fn read_daemon_lock(path: &Path) -> Result<Option<DaemonLockRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let record = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(record))
}

/// Run one tick and log the outcome. Never propagates.
pub fn run_tick(processor: &Processor) -> Option<TickOutcome> {
    match processor.tick() {
        Ok(TickOutcome::Busy) => {
            eprintln!("timefold processor: previous drain still running; tick skipped");
            Some(TickOutcome::Busy)
        }
        Ok(outcome) => Some(outcome),
        Err(err) => {
            eprintln!("timefold processor: tick failed: {err:#}");
            None
        }
    }
}

/// One collection pass with audit and warning output. Never propagates.
pub fn run_collect(paths: &TimefoldPaths, collector: &Collector) -> Option<CollectOutcome> {
    match collector.collect(Utc::now()) {
        Ok(outcome) => {
            if outcome.collected {
                audit::record(
                    paths,
                    "collector",
                    if outcome.undeleted_files.is_empty() { "ok" } else { "degraded" },
                    &format!(
                        "files={} events={} days={} deferred={} split={} undeleted={}",
                        outcome.files_processed,
                        outcome.events,
                        outcome.days.len(),
                        outcome.deferred_files,
                        outcome.split_files,
                        outcome.undeleted_files.len()
                    ),
                );
                let collected_at = now_epoch_secs().ok();
                if let Err(err) = state::update(paths, |s| s.last_collect_epoch_secs = collected_at)
                {
                    eprintln!("timefold collector: state update failed: {err:#}");
                }
            }
            Some(outcome)
        }
        Err(err) => {
            warn::emit(WarnEvent {
                code: TimefoldErrorCode::E007CollectFailed.as_str(),
                stage: "collector",
                action: "merge-day",
                request: "na",
                target: &collector.batches_dir().display().to_string(),
                retry: "next-pass",
                reason: "merge-failed",
                err: &format!("{err:#}"),
            });
            audit::record(paths, "collector", "degraded", &format!("{err:#}"));
            None
        }
    }
}

fn collect_forever(paths: &TimefoldPaths, collector: &Collector, interval: Duration) {
    loop {
        thread::sleep(interval);
        run_collect(paths, collector);
    }
}

pub fn run_daemon(paths: &TimefoldPaths, cfg: &TimefoldConfig) -> Result<()> {
    let _instance = acquire_daemon_lock(&paths.daemon_lock_file())?;
    let committer = build_committer(&cfg.committer, paths)?;
    let processor = Arc::new(Processor::new(
        paths.clone(),
        cfg.processor.clone(),
        committer,
    ));
    audit::record(
        paths,
        "daemon",
        "started",
        &format!(
            "pid={} poll_interval_secs={} collect_interval_secs={}",
            std::process::id(),
            cfg.processor.poll_interval_secs,
            cfg.collector.interval_secs
        ),
    );

    if cfg.collector.enabled {
        let collector = processor.collector();
        let collect_paths = paths.clone();
        let interval = Duration::from_secs(cfg.collector.interval_secs);
        thread::Builder::new()
            .name("timefold-collector".to_string())
            .spawn(move || collect_forever(&collect_paths, &collector, interval))
            .context("failed to spawn collector thread")?;
    }

    // Each tick runs on its own thread so a slow drain cannot delay the
    // timer; the processor's run guard drops overlapping ticks.
    let interval = processor.config().poll_interval();
    loop {
        let ticking = Arc::clone(&processor);
        if let Err(err) = thread::Builder::new()
            .name("timefold-tick".to_string())
            .spawn(move || {
                run_tick(&ticking);
            })
        {
            eprintln!("timefold processor: failed to spawn tick: {err}");
        }
        thread::sleep(interval);
    }
}
