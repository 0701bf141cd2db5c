//! CLI tests for the `ss` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use simstate::{FileBackend, InstanceRecord, RESULTS_LOG, StateStore, StoreOptions, state_map};
use tempfile::TempDir;

fn ss() -> Command {
    let mut cmd = Command::cargo_bin("ss").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_config(temp: &TempDir) -> std::path::PathBuf {
    let store_dir = temp.path().join("instances");
    let config = temp.path().join("simstate.yml");
    fs::write(
        &config,
        format!("log-level: WARN\nbackend:\n  kind: file\n  path: {}\n", store_dir.display()),
    )
    .unwrap();
    config
}

fn seed(dir: &Path) {
    let store = StateStore::new(FileBackend::open(dir).unwrap(), StoreOptions::default());
    let results = state_map! {
        1.0 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 10.0 } } },
        2.0 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 20.0 } } },
    };
    store
        .save_instance(&InstanceRecord::new("run-1", state_map! { RESULTS_LOG => results, "step" => 2 }, 2))
        .unwrap();
}

#[test]
fn test_compress_results_file() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("results.json");
    fs::write(
        &input,
        r#"{"1.0": {"m": {"s": {"c": 10.0}}}, "2.0": {"m": {"s": {"c": 20.0}}}}"#,
    )
    .unwrap();

    let output = ss()
        .args(["compress", input.to_str().unwrap(), "--kind", "results"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json, serde_json::json!({"m": {"s": {"c": [10.0, 20.0]}}}));
}

#[test]
fn test_decompress_from_stdin() {
    let output = ss()
        .args(["decompress", "-", "--kind", "results"])
        .write_stdin(r#"{"m": {"s": {"c": [10.0, 20.0]}}}"#)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"1.0": {"m": {"s": {"c": 10.0}}}, "2.0": {"m": {"s": {"c": 20.0}}}})
    );
}

#[test]
fn test_compress_series() {
    let output = ss()
        .args(["compress", "-", "--kind", "series"])
        .write_stdin(r#"{"1": {"a": 1, "b": 2}, "2": {"a": 3, "b": 4}}"#)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json, serde_json::json!({"a": [1, 3], "b": [2, 4]}));
}

#[test]
fn test_compress_rejects_malformed_log() {
    ss().args(["compress", "-", "--kind", "results"])
        .write_stdin(r#"{"1.0": 5}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected a map"));
}

#[test]
fn test_unknown_kind() {
    ss().args(["compress", "-", "--kind", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown kind"));
}

#[test]
fn test_list_show_delete() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    seed(&temp.path().join("instances"));
    let config = config.to_str().unwrap();

    ss().args(["list", "--config", config])
        .assert()
        .success()
        .stdout(predicate::str::contains("run-1"))
        .stdout(predicate::str::contains("1 instance(s)"));

    let output = ss().args(["show", "run-1", "--config", config]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["step"], 2);
    assert_eq!(json["state"]["results_log"]["1.0"]["m"]["s"]["c"], 10.0);

    let output = ss().args(["show", "run-1", "--raw", "--config", config]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["state"]["results_log"]["m"]["s"]["c"], serde_json::json!([10.0, 20.0]));
    assert_eq!(json["state"]["_log_format"]["results_log"], "compact");

    ss().args(["delete", "run-1", "--config", config])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted instance: run-1"));

    ss().args(["show", "run-1", "--config", config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Instance not found"));
}

#[test]
fn test_ttl_without_native_expiry() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    seed(&temp.path().join("instances"));

    ss().args(["ttl", "run-1", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("has no expiry (file)"));
}
