#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const UPDATES: &str = r#"
{"op": "add", "position": 0, "domain": 1, "source": [5, 6, 7], "target": [9, 10], "alignment": [[0, 0], [2, 1]]}
{"op": "add", "position": 1, "domain": 1, "source": [5, 6, 8], "target": []}
{"op": "add", "channel": 2, "position": 40, "domain": 2, "source": [5, 6], "target": [9]}
{"op": "add", "channel": 2, "position": 40, "domain": 2, "source": [5, 6], "target": [9]}
"#;

fn setup_index(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let index = dir.path().join(name);
    let input = dir.path().join("updates.jsonl");
    fs::write(&input, UPDATES).expect("write updates");
    let output = cargo_bin_cmd!("phrase-index")
        .args(["--format", "json", "--prefix-length", "2", "ingest"])
        .arg(&index)
        .arg("--input")
        .arg(&input)
        .args(["--batch-size", "2", "--create"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["lines"], 4);
    assert_eq!(json["accepted"], 3);
    assert_eq!(json["stale"], 1);
    (dir, index)
}

fn run_json(index: &Path, args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("phrase-index")
        .args(["--format", "json", "--prefix-length", "2"])
        .args(args)
        .arg(index)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn count_reports_source_and_target() {
    let (_dir, index) = setup_index("count");
    let output = cargo_bin_cmd!("phrase-index")
        .args(["--format", "json", "--prefix-length", "2", "count"])
        .arg(&index)
        .args(["5", "6"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["count"], 3);
    assert_eq!(json["side"], "source");

    let output = cargo_bin_cmd!("phrase-index")
        .args(["--prefix-length", "2", "count", "--target"])
        .arg(&index)
        .arg("9")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8_lossy(&output).trim(), "2");
}

#[test]
fn stats_emits_json() {
    let (_dir, index) = setup_index("stats");
    let json = run_json(&index, &["stats"]);
    assert_eq!(json["index"]["prefix_length"], 2);
    assert!(json["index"]["keys"].as_u64().unwrap_or(0) > 0);
    assert_eq!(json["index"]["bulk_pending"], false);
    let streams = json["streams"].as_array().expect("streams");
    assert_eq!(streams.len(), 2);
    assert!(json["filesystem"]["storage_dir_bytes"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn verify_full_succeeds() {
    let (_dir, index) = setup_index("verify");
    let json = run_json(&index, &["verify", "--level", "full"]);
    assert!(json["success"].as_bool().unwrap_or(false));
    assert_eq!(json["counts"]["records"], 3);
}

#[test]
fn sample_with_seed_is_reproducible() {
    let (_dir, index) = setup_index("sample");
    let draw = || {
        cargo_bin_cmd!("phrase-index")
            .args(["--format", "json", "--prefix-length", "2", "sample"])
            .arg(&index)
            .args(["5", "6", "--limit", "2", "--seed", "7"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    };
    let first: Value = serde_json::from_slice(&draw()).expect("valid json");
    let second: Value = serde_json::from_slice(&draw()).expect("valid json");
    assert_eq!(first, second);
    assert_eq!(first.as_array().map(Vec::len), Some(2));
}

#[test]
fn dump_respects_limit() {
    let (_dir, index) = setup_index("dump");
    let json = run_json(&index, &["dump", "--limit", "3"]);
    let lines = json.as_array().expect("dump lines");
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| line["side"] == "source"));
}

#[test]
fn delete_gc_and_compact_reclaim_domain() {
    let (dir, index) = setup_index("gc");
    let input = dir.path().join("delete.jsonl");
    fs::write(&input, r#"{"op": "delete", "position": 2, "domain": 1}"#).expect("write delete");
    cargo_bin_cmd!("phrase-index")
        .args(["--prefix-length", "2", "ingest"])
        .arg(&index)
        .arg("--input")
        .arg(&input)
        .assert()
        .success();

    let json = run_json(&index, &["gc", "--compact"]);
    assert_eq!(json["reclaimed"], 1);
    assert_eq!(json["pending_before"], serde_json::json!([1]));
    assert_eq!(json["compacted"], true);

    let json = run_json(&index, &["compact"]);
    assert!(json["keys_after"].as_u64().unwrap_or(u64::MAX) <= json["keys_before"].as_u64().unwrap_or(0));

    let json = run_json(&index, &["stats"]);
    assert_eq!(json["index"]["pending_deletions"], serde_json::json!([]));
}

#[test]
fn config_file_supplies_prefix_length() {
    let (dir, index) = setup_index("config");
    let config = dir.path().join("index.toml");
    fs::write(&config, "[index]\nprefix_length = 2\n").expect("write config");
    let output = cargo_bin_cmd!("phrase-index")
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "count"])
        .arg(&index)
        .args(["5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["count"], 3);
}

#[test]
fn missing_index_fails() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("phrase-index")
        .arg("stats")
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
}
