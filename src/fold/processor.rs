//! Drains the request spool one request at a time under the data lock.
//!
//! A tick goes `Idle → Draining → (Applying → Committed | Retrying |
//! Quarantined)* → Idle`. Deleting a request file is its commit point;
//! moving it into the backup directory is its terminal abort.

use crate::error::{TimefoldError, TimefoldErrorCode};
use crate::fold::audit;
use crate::fold::collector::Collector;
use crate::fold::committer::Committer;
use crate::fold::config::ProcessorConfig;
use crate::fold::failures::FailureTracker;
use crate::fold::handlers::{Clock, HandlerOutcome, Handlers, system_clock};
use crate::fold::lock::DataLock;
use crate::fold::paths::TimefoldPaths;
use crate::fold::request::{OperationRequest, PendingRequest};
use crate::fold::request_store::RequestStore;
use crate::fold::state;
use crate::fold::util::now_epoch_secs;
use crate::fold::warn::{self, WarnEvent};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick was still draining; this one was dropped.
    Busy,
    /// Nothing pending. The lock was not touched.
    Idle,
    /// Lock not acquired in time; nothing was applied.
    LockUnavailable,
    Drained(DrainReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: Vec<String>,
    /// `(request, attempt)` for failures still under the retry budget.
    pub failed: Vec<(String, u32)>,
    pub quarantined: Vec<String>,
    pub quarantine_failed: Vec<String>,
    /// Held back by quarantine backoff.
    pub skipped: Vec<String>,
    pub housekeeping_enqueued: Option<String>,
    pub notes: Vec<String>,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Processor {
    paths: TimefoldPaths,
    config: ProcessorConfig,
    store: RequestStore,
    lock: DataLock,
    failures: Mutex<FailureTracker>,
    running: AtomicBool,
    handlers: Handlers,
}

impl Processor {
    pub fn new(
        paths: TimefoldPaths,
        config: ProcessorConfig,
        committer: Arc<dyn Committer>,
    ) -> Self {
        Self::with_clock(paths, config, committer, system_clock())
    }

    pub fn with_clock(
        paths: TimefoldPaths,
        config: ProcessorConfig,
        committer: Arc<dyn Committer>,
        clock: Clock,
    ) -> Self {
        let collector = Arc::new(Collector::new(&paths.batches_dir));
        Self {
            store: RequestStore::new(&paths.requests_dir),
            lock: DataLock::new(&paths.lock_file, config.lock_max_hold()),
            failures: Mutex::new(FailureTracker::new()),
            running: AtomicBool::new(false),
            handlers: Handlers::new(paths.clone(), committer, collector, clock),
            paths,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub fn lock(&self) -> &DataLock {
        &self.lock
    }

    /// Shared with the periodic collection job so both serialize passes.
    pub fn collector(&self) -> Arc<Collector> {
        Arc::clone(self.handlers.collector())
    }

    pub fn failure_count(&self, file_name: &str) -> u32 {
        self.failures
            .lock()
            .map(|tracker| tracker.count(file_name))
            .unwrap_or(0)
    }

    /// Append a request to the spool. Used by producers and by the processor
    /// itself to schedule housekeeping.
    pub fn enqueue(&self, request: &OperationRequest) -> Result<String> {
        self.store.add(request)
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> Result<TickOutcome> {
        let Some(_run) = self.try_begin() else {
            return Ok(TickOutcome::Busy);
        };

        let pending = self.store.list_pending()?;
        if pending.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let guard = match self.lock.acquire(self.config.lock_timeout()) {
            Ok(guard) => guard,
            Err(err) => {
                if !matches!(
                    err.downcast_ref::<TimefoldError>(),
                    Some(TimefoldError::LockTimeout { .. })
                ) {
                    return Err(err);
                }
                warn::emit(WarnEvent {
                    code: TimefoldErrorCode::E001Locked.as_str(),
                    stage: "processor",
                    action: "acquire-lock",
                    request: &format!("pending={}", pending.len()),
                    target: &self.lock.path().display().to_string(),
                    retry: "next-tick",
                    reason: "lock-held",
                    err: &format!("{err:#}"),
                });
                audit::record(
                    &self.paths,
                    "processor",
                    "deferred",
                    &format!("lock unavailable pending={}", pending.len()),
                );
                return Ok(TickOutcome::LockUnavailable);
            }
        };

        let report = self.drain(&pending);

        if let Err(err) = guard.release() {
            eprintln!("timefold processor: {err:#}");
        }
        self.record_drain(&report);
        Ok(TickOutcome::Drained(report))
    }

    fn drain(&self, pending: &[PendingRequest]) -> DrainReport {
        let mut report = DrainReport::default();
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.retain_pending(pending.iter().map(|p| p.file_name.as_str()));

        for item in pending {
            let name = item.file_name.as_str();
            if failures.should_skip(name) {
                report.skipped.push(name.to_string());
                continue;
            }

            let applied = self
                .handlers
                .apply(&item.request)
                .and_then(|outcome| self.store.delete(name).map(|()| outcome));
            match applied {
                Ok(outcome) => {
                    failures.clear(name);
                    report.applied.push(name.to_string());
                    report.notes.push(describe(name, &outcome));
                    if outcome.recorded_commit() {
                        self.schedule_housekeeping(&item.request, &mut report);
                    }
                }
                Err(err) => self.handle_failure(&mut failures, item, &err, &mut report),
            }
        }
        report
    }

    /// Called only after a request that recorded a commit, so the committer's
    /// first-commit answer refers to that commit.
    fn schedule_housekeeping(&self, request: &OperationRequest, report: &mut DrainReport) {
        if matches!(request, OperationRequest::Housekeeping)
            || report.housekeeping_enqueued.is_some()
        {
            return;
        }
        match self.handlers.committer().is_first_commit_today() {
            Ok(true) => match self.enqueue(&OperationRequest::Housekeeping) {
                Ok(file_name) => report.housekeeping_enqueued = Some(file_name),
                Err(err) => eprintln!("timefold processor: enqueue housekeeping: {err:#}"),
            },
            Ok(false) => {}
            Err(err) => eprintln!("timefold processor: first-commit check failed: {err:#}"),
        }
    }

    fn handle_failure(
        &self,
        failures: &mut FailureTracker,
        item: &PendingRequest,
        err: &anyhow::Error,
        report: &mut DrainReport,
    ) {
        let name = item.file_name.as_str();
        let attempt = failures.record_failure(name);
        let code = err
            .downcast_ref::<TimefoldError>()
            .map_or("unclassified", |known| known.code().as_str());
        eprintln!(
            "timefold processor: {} {name} attempt {attempt}/{} failed: {err:#}",
            item.request.kind(),
            self.config.max_failures
        );
        audit::record(
            &self.paths,
            "processor",
            "retrying",
            &format!(
                "request={name} kind={} attempt={attempt} code={code} error={err:#}",
                item.request.kind()
            ),
        );

        if attempt < self.config.max_failures {
            report.failed.push((name.to_string(), attempt));
            return;
        }

        match self.store.quarantine(name, &self.paths.backup_dir) {
            Ok(target) => {
                failures.clear(name);
                warn::emit(WarnEvent {
                    code: TimefoldErrorCode::E006Quarantined.as_str(),
                    stage: "processor",
                    action: "quarantine",
                    request: name,
                    target: &target.display().to_string(),
                    retry: "manual",
                    reason: &format!("failed {attempt} times"),
                    err: &format!("{err:#}"),
                });
                audit::record(
                    &self.paths,
                    "quarantine",
                    "ok",
                    &format!("request={name} target={}", target.display()),
                );
                report.quarantined.push(name.to_string());
            }
            Err(move_err) => {
                let backoff = failures.record_quarantine_miss(name);
                warn::emit(WarnEvent {
                    code: TimefoldErrorCode::E006Quarantined.as_str(),
                    stage: "processor",
                    action: "quarantine",
                    request: name,
                    target: &self.paths.backup_dir.display().to_string(),
                    retry: &format!("after-{backoff}-ticks"),
                    reason: "move-failed",
                    err: &format!("{move_err:#}"),
                });
                report.quarantine_failed.push(name.to_string());
            }
        }
    }

    fn record_drain(&self, report: &DrainReport) {
        let status = if report.quarantined.is_empty()
            && report.quarantine_failed.is_empty()
            && report.failed.is_empty()
        {
            "ok"
        } else {
            "degraded"
        };
        audit::record(
            &self.paths,
            "processor",
            status,
            &format!(
                "applied={} failed={} quarantined={} quarantine_failed={} skipped={}",
                report.applied.len(),
                report.failed.len(),
                report.quarantined.len(),
                report.quarantine_failed.len(),
                report.skipped.len()
            ),
        );
        let drained_at = now_epoch_secs().ok();
        if let Err(err) = state::update(&self.paths, |s| s.last_drain_epoch_secs = drained_at) {
            eprintln!("timefold processor: state update failed: {err:#}");
        }
    }
}

fn describe(name: &str, outcome: &HandlerOutcome) -> String {
    match outcome {
        HandlerOutcome::Committed { message, recorded } => {
            format!("{name}: {message} recorded={recorded}")
        }
        HandlerOutcome::BatchWritten {
            file_name,
            events,
            rejected,
            undeleted,
            ..
        } => format!(
            "{name}: wrote {file_name} events={events} rejected={rejected} undeleted={undeleted}"
        ),
        HandlerOutcome::Housekeeping {
            files_collected, ..
        } => {
            format!("{name}: housekeeping collected={files_collected}")
        }
        HandlerOutcome::NoOp(reason) => format!("{name}: no-op ({reason})"),
    }
}
