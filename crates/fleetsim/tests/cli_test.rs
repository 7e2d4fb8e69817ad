//! Integration tests for the `fleetsim` CLI binary.
//!
//! Every test points `--config` at a temp dir so the user's real
//! configuration is never read.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `fleetsim` binary with env isolation.
fn fleetsim_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("fleetsim");
    cmd.env("HOME", "/tmp/fleetsim-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/fleetsim-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("FLEETSIM_CONFIG")
        .env_remove("FLEETSIM_HUB_NAME")
        .env_remove("FLEETSIM_FREQUENCY_MS")
        .env_remove("FLEETSIM_RANDOMNESS_MS")
        .env_remove("FLEETSIM_PROTOCOL")
        .env_remove("FLEETSIM_GENERATOR");
    cmd
}

fn with_config(path: &Path) -> assert_cmd::Command {
    let mut cmd = fleetsim_cmd();
    cmd.arg("--config").arg(path);
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = fleetsim_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_flag() {
    fleetsim_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("simulated devices")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("roster"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    fleetsim_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetsim"));
}

#[test]
fn test_completions_bash() {
    fleetsim_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetsim"));
}

#[test]
fn test_unknown_generator_is_a_usage_error() {
    let output = fleetsim_cmd()
        .args(["run", "--generator", "pressure"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.toml");
    with_config(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fleet.toml"));
}

#[test]
fn test_config_init_writes_reference_roster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");

    with_config(&path).args(["config", "init"]).assert().success();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("device1000"));
    assert!(written.contains("DEVICE1010_KEY"));

    // A second init refuses to clobber the file.
    let output = with_config(&path).args(["config", "init"]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("--force"));

    with_config(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_show_redacts_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    std::fs::write(
        &path,
        "hub_name = \"factory-hub\"\n\n[[devices]]\nid = \"press01\"\nkey = \"cHJlc3MwMQ==\"\n",
    )
    .unwrap();

    with_config(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("factory-hub")
                .and(predicate::str::contains("press01"))
                .and(predicate::str::contains("cHJlc3MwMQ==").not()),
        );
}

// ── Roster ──────────────────────────────────────────────────────────

#[test]
fn test_roster_lists_devices_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    with_config(&path).args(["config", "init"]).assert().success();

    let output = with_config(&path)
        .args(["roster", "-o", "json"])
        .env("DEVICE1003_KEY", "ZGV2aWNlMTAwMw==")
        .output()
        .unwrap();
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[3]["id"], "device1003");
    assert_eq!(rows[3]["key_source"], "env DEVICE1003_KEY");
    assert_eq!(rows[0]["generator"], "temperature");
}

#[test]
fn test_empty_roster_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = with_config(&dir.path().join("absent.toml"))
        .arg("roster")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("devices"));
}

#[test]
fn test_malformed_config_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    std::fs::write(&path, "frequency_ms = \"often\"\n").unwrap();

    let output = with_config(&path).arg("roster").output().unwrap();
    assert_eq!(output.status.code(), Some(3));
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_publishes_and_reports_summary() {
    let dir = tempfile::tempdir().unwrap();
    let output = with_config(&dir.path().join("absent.toml"))
        .args([
            "run",
            "--devices",
            "2",
            "--frequency",
            "200ms",
            "--duration",
            "1s",
            "--seed",
            "42",
            "-o",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let devices = summary.as_array().unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["name"], "device1000");
    assert_eq!(devices[1]["name"], "device1001");
    for device in devices {
        assert_eq!(device["state"], "connected");
        assert!(device["sent"].as_u64().unwrap() >= 1, "{device}");
        assert_eq!(device["send_errors"], 0);
    }

    // Device activity is logged to stderr.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("client connected"), "{stderr}");
}

#[test]
fn test_run_rejects_invalid_frequency() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    std::fs::write(&path, "frequency_ms = 0\n").unwrap();

    let output = with_config(&path)
        .args(["run", "--devices", "1", "--duration", "1s"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("frequency_ms"));
}

#[test]
fn test_run_without_keys_names_the_device() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    with_config(&path).args(["config", "init"]).assert().success();

    let mut cmd = with_config(&path);
    for n in 1000..=1010 {
        cmd.env_remove(format!("DEVICE{n}_KEY"));
    }
    let output = cmd.args(["run", "--duration", "1s"]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("device1000"));
}

const MIXED_HOSTS_TOML: &str = "hub_name = \"factory-hub\"\nfrequency_ms = 200\n\n\
    [[devices]]\nid = \"press01\"\nkey = \"cHJlc3MwMQ==\"\n\n\
    [[devices]]\nid = \"press02\"\n\
    connection_string = \"HostName=elsewhere.azure-devices.net;DeviceId=press02;SharedAccessKey=cHJlc3MwMg==\"\n";

#[test]
fn test_run_tolerates_a_failed_device_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    std::fs::write(&path, MIXED_HOSTS_TOML).unwrap();

    let output = with_config(&path)
        .args(["run", "--duration", "1s", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary[0]["state"], "connected");
    assert_eq!(summary[1]["state"], "failed");
}

#[test]
fn test_require_connected_reports_the_failed_device() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    std::fs::write(&path, MIXED_HOSTS_TOML).unwrap();

    let output = with_config(&path)
        .args(["run", "--duration", "1s", "--require-connected"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert!(combined_output(&output).contains("press02"));
}

#[test]
fn test_run_only_unknown_device_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetsim.toml");
    std::fs::write(&path, MIXED_HOSTS_TOML).unwrap();

    let output = with_config(&path)
        .args(["run", "--duration", "1s", "--only", "press09"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("press09"));
}
