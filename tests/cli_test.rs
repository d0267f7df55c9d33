use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn timefold(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("timefold");
    cmd.current_dir(home)
        .env("TIMEFOLD_HOME", home)
        .env("TIMEFOLD_COMMITTER", "local")
        .env("TIMEFOLD_LOCK_TIMEOUT_MS", "200");
    cmd
}

fn spool_files(dir: &std::path::Path) -> usize {
    fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn enqueue_then_drain_applies_request() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path();

    timefold(home)
        .arg("enqueue")
        .arg(r#"{"type":"projectChange","action":"add","branch":"main","directory":"/w/p1","project":"Acme"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("type=projectChange"));
    assert_eq!(spool_files(&home.join("spool/requests")), 1);

    // The first commit of the day schedules housekeeping behind it.
    timefold(home)
        .arg("drain")
        .assert()
        .success()
        .stdout(predicate::str::contains("applied=1"))
        .stdout(predicate::str::contains("housekeeping_enqueued="));
    assert_eq!(spool_files(&home.join("spool/requests")), 1);

    timefold(home).arg("drain").assert().success();
    assert_eq!(spool_files(&home.join("spool/requests")), 0);

    let projects = fs::read_to_string(home.join("data/projects.json")).expect("projects");
    assert!(projects.contains("Acme"));
    let audit = fs::read_to_string(home.join("logs/audit.log")).expect("audit");
    assert!(audit.contains("projectChange: add main//w/p1"));
}

#[test]
fn enqueue_rejects_unknown_type() {
    let tmp = tempdir().expect("tempdir");
    timefold(tmp.path())
        .arg("enqueue")
        .arg(r#"{"type":"launchRockets"}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("known `type`"));
    assert_eq!(spool_files(&tmp.path().join("spool/requests")), 0);
}

#[test]
fn touch_and_process_batch_write_a_batch_file() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path();

    for file in ["src/a.ts", "src/b.ts"] {
        timefold(home)
            .args(["touch", "--directory", "/workspace/project1", "--file", file])
            .args(["--branch", "main"])
            .assert()
            .success();
    }
    assert_eq!(spool_files(&home.join("spool/queue")), 2);

    timefold(home)
        .args(["enqueue", r#"{"type":"processBatch"}"#])
        .assert()
        .success();
    timefold(home).arg("drain").assert().success();

    assert_eq!(spool_files(&home.join("spool/queue")), 0);
    let batches: Vec<_> = fs::read_dir(home.join("data/batches"))
        .expect("batches")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("batch_"))
        .collect();
    assert_eq!(batches.len(), 1);
    let body = fs::read_to_string(batches[0].path()).expect("batch");
    assert!(body.contains("src/a.ts"));
    assert!(body.contains("src/b.ts"));
}

#[test]
fn status_json_reports_pending_counts() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path();
    timefold(home)
        .args(["enqueue", r#"{"type":"housekeeping"}"#])
        .assert()
        .success();

    let output = timefold(home)
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["command"], "status");
    assert_eq!(report["ok"], true);
    let details = report["details"].as_array().expect("details");
    assert!(details.iter().any(|d| d == "requests.pending=1"));
    assert!(details.iter().any(|d| d == "data_lock=free"));
}

#[test]
fn drain_reports_held_lock_as_failure() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path();
    timefold(home)
        .args(["enqueue", r#"{"type":"housekeeping"}"#])
        .assert()
        .success();

    fs::create_dir_all(home.join("spool")).expect("mkdir");
    fs::write(
        home.join("spool/data.lock"),
        r#"{"pid":1,"token":"other","acquired_at_epoch_ms":0,"expires_at_epoch_ms":99999999999999}"#,
    )
    .expect("lock");

    timefold(home)
        .arg("drain")
        .assert()
        .failure()
        .stdout(predicate::str::contains("data lock held"))
        .stderr(predicate::str::contains("TIMEFOLD_WARN"));
    assert_eq!(spool_files(&home.join("spool/requests")), 1);
}
