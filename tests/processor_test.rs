use anyhow::{Result, anyhow};
use chrono::{TimeZone, Utc};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::tempdir;
use timefold::fold::batch::BatchEntry;
use timefold::fold::committer::{Committer, LocalCommitter};
use timefold::fold::config::ProcessorConfig;
use timefold::fold::lock::LockRecord;
use timefold::fold::mover::{QueueEntry, TouchQueue};
use timefold::fold::paths::TimefoldPaths;
use timefold::fold::processor::{Processor, TickOutcome};
use timefold::fold::request::{OperationRequest, ProjectAction, ProjectChange};
use timefold::fold::spool::list_sorted;
use timefold::fold::state;
use timefold::fold::util::now_epoch_millis;

#[derive(Default)]
struct RecordingCommitter {
    messages: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    nothing_to_record: AtomicBool,
    first_today: AtomicBool,
    housekeeping_runs: AtomicUsize,
}

impl RecordingCommitter {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages").clone()
    }
}

impl Committer for RecordingCommitter {
    fn commit(&self, message: &str) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(anyhow!("commit refused"));
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("commit refused ({remaining} left)"));
        }
        if self.nothing_to_record.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.messages
            .lock()
            .expect("messages")
            .push(message.to_string());
        Ok(true)
    }

    fn is_first_commit_today(&self) -> Result<bool> {
        Ok(self.first_today.load(Ordering::SeqCst))
    }

    fn housekeeping(&self) -> Result<()> {
        self.housekeeping_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(max_failures: u32) -> ProcessorConfig {
    ProcessorConfig {
        poll_interval_secs: 1,
        max_failures,
        lock_timeout_ms: 60,
        lock_max_hold_secs: 60,
    }
}

fn unbound(project: &str) -> OperationRequest {
    OperationRequest::ProjectChange(ProjectChange {
        action: ProjectAction::AddUnbound,
        branch: None,
        directory: None,
        project: Some(project.to_string()),
    })
}

fn setup(
    max_failures: u32,
) -> (
    tempfile::TempDir,
    TimefoldPaths,
    Arc<RecordingCommitter>,
    Processor,
) {
    let tmp = tempdir().expect("tempdir");
    let paths = TimefoldPaths::under(tmp.path());
    let committer = Arc::new(RecordingCommitter::default());
    let processor = Processor::new(paths.clone(), config(max_failures), committer.clone());
    (tmp, paths, committer, processor)
}

fn drained(outcome: TickOutcome) -> timefold::fold::processor::DrainReport {
    match outcome {
        TickOutcome::Drained(report) => report,
        other => panic!("expected a drain, got {other:?}"),
    }
}

#[test]
fn requests_are_applied_in_arrival_order() {
    let (_tmp, paths, committer, processor) = setup(5);
    let names: Vec<String> = ["Acme", "Globex", "Initech"]
        .iter()
        .map(|p| processor.enqueue(&unbound(p)).expect("enqueue"))
        .collect();

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied, names);
    assert_eq!(committer.messages().len(), 3);
    assert!(list_sorted(&paths.requests_dir).expect("list").is_empty());

    let projects: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(paths.data_dir.join("projects.json")).expect("projects"),
    )
    .expect("json");
    assert_eq!(projects["unbound"], serde_json::json!(["Acme", "Globex", "Initech"]));
}

#[test]
fn empty_spool_is_idle_and_leaves_lock_alone() {
    let (_tmp, paths, committer, processor) = setup(5);
    assert_eq!(processor.tick().expect("tick"), TickOutcome::Idle);
    assert!(!paths.lock_file.exists());
    assert_eq!(committer.attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn always_failing_request_is_quarantined_after_max_failures() {
    let (_tmp, paths, committer, processor) = setup(3);
    committer.fail_always.store(true, Ordering::SeqCst);
    let name = processor.enqueue(&unbound("Acme")).expect("enqueue");
    let original = fs::read(paths.requests_dir.join(&name)).expect("read request");

    for attempt in 1..=2 {
        let report = drained(processor.tick().expect("tick"));
        assert_eq!(report.failed, vec![(name.clone(), attempt)]);
        assert!(paths.requests_dir.join(&name).exists());
        assert_eq!(processor.failure_count(&name), attempt);
    }

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.quarantined, vec![name.clone()]);
    assert!(!paths.requests_dir.join(&name).exists());
    assert_eq!(
        fs::read(paths.backup_dir.join(&name)).expect("backup copy"),
        original
    );
    assert_eq!(committer.attempts.load(Ordering::SeqCst), 3);

    // Never picked up again.
    assert_eq!(processor.tick().expect("tick"), TickOutcome::Idle);
    assert_eq!(committer.attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn request_succeeding_on_last_allowed_attempt_is_not_quarantined() {
    let (_tmp, paths, committer, processor) = setup(5);
    committer.fail_next.store(4, Ordering::SeqCst);
    let name = processor.enqueue(&unbound("Acme")).expect("enqueue");

    for _ in 0..4 {
        let report = drained(processor.tick().expect("tick"));
        assert!(report.applied.is_empty());
        assert!(report.quarantined.is_empty());
    }
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied, vec![name.clone()]);
    assert_eq!(processor.failure_count(&name), 0);
    assert!(list_sorted(&paths.backup_dir).expect("backup").is_empty());
    assert!(list_sorted(&paths.requests_dir).expect("requests").is_empty());
}

#[test]
fn held_lock_defers_without_counting_failures() {
    let (_tmp, paths, committer, processor) = setup(2);
    let name = processor.enqueue(&unbound("Acme")).expect("enqueue");

    let now = now_epoch_millis().expect("now");
    let foreign = LockRecord {
        pid: 1,
        token: "held-elsewhere".to_string(),
        acquired_at_epoch_ms: now,
        expires_at_epoch_ms: now + 60_000,
    };
    fs::create_dir_all(paths.lock_file.parent().expect("parent")).expect("mkdir");
    fs::write(&paths.lock_file, serde_json::to_vec(&foreign).expect("json")).expect("lock");

    for _ in 0..3 {
        assert_eq!(processor.tick().expect("tick"), TickOutcome::LockUnavailable);
    }
    assert_eq!(committer.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(processor.failure_count(&name), 0);
    assert!(paths.requests_dir.join(&name).exists());

    fs::remove_file(&paths.lock_file).expect("unlock");
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied, vec![name]);
    assert!(!paths.lock_file.exists());
}

#[test]
fn expired_lock_is_reclaimed() {
    let (_tmp, paths, _committer, processor) = setup(2);
    processor.enqueue(&unbound("Acme")).expect("enqueue");

    let stale = LockRecord {
        pid: 1,
        token: "crashed".to_string(),
        acquired_at_epoch_ms: 1_000,
        expires_at_epoch_ms: 2_000,
    };
    fs::create_dir_all(paths.lock_file.parent().expect("parent")).expect("mkdir");
    fs::write(&paths.lock_file, serde_json::to_vec(&stale).expect("json")).expect("lock");

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied.len(), 1);
}

#[test]
fn process_batch_groups_queue_by_branch_and_directory() {
    let (_tmp, paths, committer, processor) = setup(5);
    let queue = TouchQueue::new(&paths.queue_dir);
    let ts = |minute: u32| {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, minute, 0)
            .single()
            .expect("ts")
    };
    for (branch, directory, file, minute) in [
        (Some("main"), "/workspace/project1", "src/a.ts", 1),
        (Some("develop"), "/workspace/project2", "src/b.ts", 2),
        (Some("main"), "/workspace/project1", "src/c.ts", 3),
        (None, "/workspace/project2", "README.md", 4),
    ] {
        queue
            .append(&QueueEntry {
                directory: directory.to_string(),
                filename: file.to_string(),
                git_branch: branch.map(str::to_string),
                timestamp: ts(minute),
            })
            .expect("append");
    }

    processor
        .enqueue(&OperationRequest::ProcessBatch)
        .expect("enqueue");
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied.len(), 1);

    let batches: Vec<_> = fs::read_dir(&paths.batches_dir)
        .expect("batches dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(batches.len(), 1);
    let batch: BatchEntry =
        serde_json::from_str(&fs::read_to_string(&batches[0]).expect("read")).expect("parse");

    let main = &batch.0["main"]["/workspace/project1"];
    assert_eq!(main.len(), 2);
    assert_eq!(main[0].file, "src/a.ts");
    assert_eq!(main[1].file, "src/c.ts");
    assert_eq!(batch.0["develop"]["/workspace/project2"].len(), 1);
    assert_eq!(batch.0["no-branch"]["/workspace/project2"][0].file, "README.md");

    assert!(list_sorted(&paths.queue_dir).expect("queue").is_empty());
    assert!(list_sorted(&paths.staging_dir).expect("staging").is_empty());

    let messages = committer.messages();
    let file_name = batches[0]
        .file_name()
        .and_then(|n| n.to_str())
        .expect("name");
    assert_eq!(messages, vec![format!("processBatch: {file_name}")]);
}

#[test]
fn process_batch_with_empty_queue_writes_nothing() {
    let (_tmp, paths, committer, processor) = setup(5);
    processor
        .enqueue(&OperationRequest::ProcessBatch)
        .expect("enqueue");
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied.len(), 1);
    assert!(!paths.batches_dir.exists());
    assert!(committer.messages().is_empty());
}

#[test]
fn failed_batch_commit_restores_queue() {
    let (_tmp, paths, committer, processor) = setup(5);
    committer.fail_next.store(1, Ordering::SeqCst);
    TouchQueue::new(&paths.queue_dir)
        .append(&QueueEntry {
            directory: "/w".to_string(),
            filename: "a.rs".to_string(),
            git_branch: Some("main".to_string()),
            timestamp: Utc::now(),
        })
        .expect("append");
    processor
        .enqueue(&OperationRequest::ProcessBatch)
        .expect("enqueue");

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(list_sorted(&paths.queue_dir).expect("queue").len(), 1);
    assert!(list_sorted(&paths.staging_dir).expect("staging").is_empty());
    let leftover = fs::read_dir(&paths.batches_dir)
        .map(|rd| rd.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied.len(), 1);
    assert!(list_sorted(&paths.queue_dir).expect("queue").is_empty());
}

#[test]
fn first_commit_of_the_day_schedules_housekeeping_once() {
    let (_tmp, paths, committer, processor) = setup(5);
    committer.first_today.store(true, Ordering::SeqCst);
    processor.enqueue(&unbound("Acme")).expect("enqueue");
    processor.enqueue(&unbound("Globex")).expect("enqueue");

    let report = drained(processor.tick().expect("tick"));
    let housekeeping = report.housekeeping_enqueued.expect("housekeeping enqueued");
    let pending = processor.store().list_pending().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_name, housekeeping);
    assert_eq!(pending[0].request, OperationRequest::Housekeeping);

    committer.first_today.store(false, Ordering::SeqCst);
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied, vec![housekeeping]);
    assert!(report.housekeeping_enqueued.is_none());
    assert_eq!(committer.housekeeping_runs.load(Ordering::SeqCst), 1);

    let saved = state::load(&paths).expect("state");
    assert_eq!(saved.last_housekeeping_day, Some(Utc::now().date_naive()));
}

#[test]
fn noop_requests_after_first_commit_do_not_reschedule_housekeeping() {
    let (_tmp, _paths, committer, processor) = setup(5);
    // The committer keeps answering "first" as a stale flag would.
    committer.first_today.store(true, Ordering::SeqCst);
    processor.enqueue(&unbound("Acme")).expect("enqueue");
    let report = drained(processor.tick().expect("tick"));
    assert!(report.housekeeping_enqueued.is_some());

    for _ in 0..3 {
        processor
            .enqueue(&OperationRequest::ProcessBatch)
            .expect("enqueue");
        let report = drained(processor.tick().expect("tick"));
        assert!(report.housekeeping_enqueued.is_none());
    }
    assert_eq!(processor.tick().expect("tick"), TickOutcome::Idle);
    assert_eq!(committer.housekeeping_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn commit_with_nothing_to_record_does_not_schedule_housekeeping() {
    let (_tmp, _paths, committer, processor) = setup(5);
    committer.first_today.store(true, Ordering::SeqCst);
    committer.nothing_to_record.store(true, Ordering::SeqCst);
    processor.enqueue(&unbound("Acme")).expect("enqueue");

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.applied.len(), 1);
    assert!(report.housekeeping_enqueued.is_none());
    assert!(processor.store().list_pending().expect("pending").is_empty());
}

#[test]
fn local_committer_schedules_housekeeping_once_across_noop_batches() {
    let tmp = tempdir().expect("tempdir");
    let paths = TimefoldPaths::under(tmp.path());
    let committer = Arc::new(LocalCommitter::new(paths.clone()));
    let processor = Processor::new(paths.clone(), config(5), committer);

    processor.enqueue(&unbound("Acme")).expect("enqueue");
    let report = drained(processor.tick().expect("tick"));
    assert!(report.housekeeping_enqueued.is_some());

    for _ in 0..3 {
        processor
            .enqueue(&OperationRequest::ProcessBatch)
            .expect("enqueue");
        let report = drained(processor.tick().expect("tick"));
        assert!(report.housekeeping_enqueued.is_none());
    }
    assert_eq!(processor.tick().expect("tick"), TickOutcome::Idle);
    assert_eq!(
        state::load(&paths).expect("state").last_housekeeping_day,
        Some(Utc::now().date_naive())
    );
}

#[test]
fn failed_quarantine_move_backs_off_and_retries() {
    let (_tmp, paths, committer, processor) = setup(2);
    committer.fail_always.store(true, Ordering::SeqCst);
    let name = processor.enqueue(&unbound("Acme")).expect("enqueue");

    // A regular file where the backup directory belongs makes the move fail.
    fs::create_dir_all(&paths.spool_dir).expect("mkdir");
    fs::write(&paths.backup_dir, "in the way").expect("blocker");

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.failed, vec![(name.clone(), 1)]);

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.quarantine_failed, vec![name.clone()]);
    assert!(paths.requests_dir.join(&name).exists());
    assert_eq!(processor.failure_count(&name), 2);

    // Backoff after the first miss is one tick, after the second two.
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.skipped, vec![name.clone()]);
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.quarantine_failed, vec![name.clone()]);
    for _ in 0..2 {
        let report = drained(processor.tick().expect("tick"));
        assert_eq!(report.skipped, vec![name.clone()]);
        assert!(report.quarantine_failed.is_empty());
    }
    assert!(processor.failure_count(&name) >= 2);

    fs::remove_file(&paths.backup_dir).expect("remove blocker");
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.quarantined, vec![name.clone()]);
    assert!(paths.backup_dir.join(&name).is_file());
    assert!(!paths.requests_dir.join(&name).exists());
    assert_eq!(processor.tick().expect("tick"), TickOutcome::Idle);
}

#[test]
fn unparseable_request_is_quarantined_unchanged() {
    let (_tmp, paths, committer, processor) = setup(2);
    fs::create_dir_all(&paths.requests_dir).expect("mkdir");
    let name = "0000000000001_0123456789ab.json";
    fs::write(paths.requests_dir.join(name), "{not json").expect("write");

    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.failed, vec![(name.to_string(), 1)]);
    let report = drained(processor.tick().expect("tick"));
    assert_eq!(report.quarantined, vec![name.to_string()]);

    assert_eq!(
        fs::read_to_string(paths.backup_dir.join(name)).expect("backup"),
        "{not json"
    );
    assert_eq!(committer.attempts.load(Ordering::SeqCst), 0);
}

struct GatedCommitter {
    entered: mpsc::SyncSender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Committer for GatedCommitter {
    fn commit(&self, _message: &str) -> Result<bool> {
        self.entered.send(()).map_err(|_| anyhow!("test gone"))?;
        self.release
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .recv()
            .map_err(|_| anyhow!("test gone"))?;
        Ok(true)
    }

    fn is_first_commit_today(&self) -> Result<bool> {
        Ok(false)
    }

    fn housekeeping(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn overlapping_tick_is_dropped_while_draining() {
    let tmp = tempdir().expect("tempdir");
    let paths = TimefoldPaths::under(tmp.path());
    let (entered_tx, entered_rx) = mpsc::sync_channel(1);
    let (release_tx, release_rx) = mpsc::channel();
    let committer = Arc::new(GatedCommitter {
        entered: entered_tx,
        release: Mutex::new(release_rx),
    });
    let processor = Arc::new(Processor::new(paths, config(5), committer));
    processor.enqueue(&unbound("Acme")).expect("enqueue");

    let background = Arc::clone(&processor);
    let handle = thread::spawn(move || background.tick().expect("tick"));

    entered_rx.recv().expect("first tick entered commit");
    assert!(processor.is_running());
    assert_eq!(processor.tick().expect("second tick"), TickOutcome::Busy);

    release_tx.send(()).expect("release");
    let report = drained(handle.join().expect("join"));
    assert_eq!(report.applied.len(), 1);
    assert!(!processor.is_running());
}
