//! Basic CLI integration tests. None of these reach the network.

#![allow(deprecated)] // Command::cargo_bin deprecated for custom build-dir; still works for default

use assert_cmd::Command;
use pretty_assertions::assert_eq;
use std::path::Path;

fn bin() -> Command {
    Command::cargo_bin("moly-lookup").unwrap()
}

/// Config file in `dir` whose cache lives next to it.
fn temp_config(dir: &Path) -> String {
    let config = dir.join("config.toml");
    let cache = dir.join("cache.json");
    std::fs::write(
        &config,
        format!("[cache]\npath = {:?}\n", cache.display().to_string()),
    )
    .unwrap();
    config.display().to_string()
}

#[test]
fn help_prints_and_exits_success() {
    bin().arg("--help").assert().success();
}

#[test]
fn config_show_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path());
    bin().args(["config", "show", "--config", &config]).assert().success();
}

#[test]
fn config_show_json_valid() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path());
    let out = bin()
        .args(["config", "show", "--json", "--config", &config])
        .assert()
        .success();
    let stdout = std::str::from_utf8(&out.get_output().stdout).unwrap();
    let v: serde_json::Value = serde_json::from_str(stdout).expect("config show --json should output valid JSON");
    assert_eq!(v["lookup"]["max_books"], 3);
    assert_eq!(v["lookup"]["base_url"], "https://moly.hu");
}

#[test]
fn config_set_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("nested").join("config.toml");
    let config = config.display().to_string();

    bin()
        .args(["config", "set", "lookup.max_covers", "2", "--config", &config])
        .assert()
        .success();
    let out = bin()
        .args(["config", "show", "--json", "--config", &config])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v["lookup"]["max_covers"], 2);
}

#[test]
fn config_set_unknown_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml").display().to_string();
    let out = bin()
        .args(["config", "set", "lookup.nope", "1", "--config", &config])
        .assert()
        .failure();
    let stderr = std::str::from_utf8(&out.get_output().stderr).unwrap();
    assert!(stderr.contains("lookup.nope"));
}

#[test]
fn config_set_invalid_value_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml").display().to_string();
    bin()
        .args(["config", "set", "lookup.max_books", "many", "--config", &config])
        .assert()
        .failure();
}

#[test]
fn identify_without_query_finds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path());
    let out = bin()
        .args(["identify", "--config", &config])
        .assert()
        .success();
    let stdout = std::str::from_utf8(&out.get_output().stdout).unwrap();
    assert!(stdout.contains("No metadata found"));
}

#[test]
fn identify_without_query_json_is_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path());
    let out = bin()
        .args(["identify", "--json", "--config", &config])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v, serde_json::json!([]));
}

#[test]
fn cover_uses_cached_urls() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path());
    std::fs::write(
        dir.path().join("cache.json"),
        r#"{"covers":{"nemo-kapitany":["https://moly.hu/system/covers/big/1.jpg"]},"isbns":{}}"#,
    )
    .unwrap();

    let out = bin()
        .args(["cover", "--id", "nemo-kapitany", "--json", "--config", &config])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v, serde_json::json!(["https://moly.hu/system/covers/big/1.jpg"]));
}

#[test]
fn malformed_cache_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(dir.path());
    std::fs::write(dir.path().join("cache.json"), "not json").unwrap();

    let out = bin()
        .args(["identify", "--json", "--config", &config])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v, serde_json::json!([]));
}
