//! Integration tests for the depcapture binary

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

use super::common::fixtures::BasePath;
use depcapture::util::join_path_list;
use depcapture::Store;

/// Binary with an isolated data directory
fn depcapture(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("depcapture").expect("binary should be built");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd.env_remove("DEPCAPTURE_SEARCH_PATH");
    cmd.env_remove("DEPCAPTURE_RUNTIME_HOME");
    cmd
}

fn json_names(report: &Value, key: &str) -> Vec<String> {
    report[key]
        .as_array()
        .expect("array in report")
        .iter()
        .map(|entry| entry["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn fixture() -> BasePath {
    let base = BasePath::new();
    base.unit("A", "proc main\n  call B run\n  arg 0\nend\n")
        .unit("B", "proc run\n  resource data/table.csv\nend\n")
        .unit("Picked", "")
        .unit("Unused", "")
        .resource("data/table.csv", "1,2,3\n");
    base
}

#[test]
fn test_index_lists_units_and_resources() {
    let data_dir = TempDir::new().unwrap();
    let base = fixture();

    let output = depcapture(&data_dir)
        .arg("index")
        .arg(&base.path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let entries: Value = serde_json::from_slice(&output).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 5);
    assert!(entries
        .iter()
        .any(|e| e["kind"] == "resource" && e["name"] == "data/table.csv"));
    assert!(entries.iter().any(|e| e["kind"] == "unit" && e["name"] == "Unused"));
}

#[test]
fn test_capture_without_destination_reports_discoveries() {
    let data_dir = TempDir::new().unwrap();
    let base = fixture();

    let output = depcapture(&data_dir)
        .args(["capture", "--entry", "A", "--base-path"])
        .arg(&base.path)
        .args(["--", "Picked"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json_names(&report, "units"), ["A", "B", "Picked"]);
    assert_eq!(json_names(&report, "resources"), ["data/table.csv"]);
    assert!(report["store"].is_null());
}

#[test]
fn test_single_pass_capture_runs_from_store() {
    let data_dir = TempDir::new().unwrap();
    let base = fixture();
    let dest = TempDir::new().unwrap();

    depcapture(&data_dir)
        .args(["capture", "--single-pass", "-e", "A", "-b"])
        .arg(&base.path)
        .arg("--destination")
        .arg(dest.path())
        .args(["--", "Picked"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Picked\""));

    let store = Store::open(dest.path()).unwrap();
    let stored = store.scan().unwrap();
    assert!(stored.unit("A").is_some());
    assert!(stored.unit("B").is_some());
    assert!(stored.unit("Unused").is_none());

    // The store alone is enough to run the entry point again
    depcapture(&data_dir)
        .args(["run", "--search-path"])
        .arg(join_path_list(store.bucket_dirs().unwrap()))
        .args(["A", "Picked"])
        .assert()
        .success();
}

#[test]
fn test_run_fails_on_unresolved_unit() {
    let data_dir = TempDir::new().unwrap();
    let base = fixture();

    depcapture(&data_dir)
        .args(["run", "--search-path"])
        .arg(&base.path)
        .args(["A", "Missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing"));
}

#[test]
fn test_excluded_entry_point_stays_out_of_store() {
    let data_dir = TempDir::new().unwrap();
    let base = fixture();
    let dest = TempDir::new().unwrap();

    depcapture(&data_dir)
        .args(["capture", "--single-pass", "--exclude-entry", "-e", "A", "-b"])
        .arg(&base.path)
        .arg("-d")
        .arg(dest.path())
        .args(["--", "Picked"])
        .assert()
        .success();

    let stored = Store::open(dest.path()).unwrap().scan().unwrap();
    assert!(stored.unit("A").is_none());
    assert!(stored.unit("Picked").is_some());
}

#[test]
fn test_capture_reports_invocation_failure() {
    let data_dir = TempDir::new().unwrap();
    let base = BasePath::new();
    base.unit("A", "proc main\n  fail boom\nend\n");

    depcapture(&data_dir)
        .args(["capture", "-e", "A", "-b"])
        .arg(&base.path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("boom"));
}

#[test]
fn test_resume_rejects_malformed_token() {
    let data_dir = TempDir::new().unwrap();

    depcapture(&data_dir)
        .args(["resume", "--", "--token-version", "99", "", "A", "/tmp/nowhere", "true", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported resume token version 99"));
}

#[test]
fn test_logs_go_to_data_dir() {
    let data_dir = TempDir::new().unwrap();
    let base = fixture();

    depcapture(&data_dir).arg("index").arg(&base.path).assert().success();

    assert!(data_dir.path().join("logs").join("depcapture.log").is_file());
    assert!(data_dir.path().join("config.toml").is_file());
}
