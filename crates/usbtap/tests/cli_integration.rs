//! Integration tests for the `usbtap` binary.
//!
//! These run the binary via `assert_cmd` and only exercise paths that need no
//! hardware: help, version, configuration display and argument errors.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn cli() -> assert_cmd::Command {
    cargo_bin_cmd!("usbtap")
}

#[test]
fn cli_help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("usbtap"))
        .stdout(predicate::str::contains("devices"))
        .stdout(predicate::str::contains("read"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn cli_version_prints_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_read_help_lists_flags() {
    cli()
        .args(["read", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--serial"))
        .stdout(predicate::str::contains("--preset"))
        .stdout(predicate::str::contains("--deadline-ms"));
}

#[test]
fn cli_devices_help_lists_capacity() {
    cli()
        .args(["devices", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--capacity"));
}

#[test]
fn cli_no_subcommand_fails() {
    cli().assert().failure();
}

#[test]
fn cli_unknown_preset_is_rejected() {
    cli()
        .args(["read", "--preset", "burst"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown preset"));
}

// ── config ──

#[test]
fn cli_config_json_produces_valid_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let output = cli()
        .args(["--json", "--config"])
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value =
        serde_json::from_slice(&output).expect("config --json should produce valid JSON");
    assert!(json["settings"].is_object());
    assert_eq!(json["settings"]["vendor_id"], 0x1733);
    assert_eq!(json["settings"]["read_size"], 1024);
    assert_eq!(json["config_file_exists"], false);
    assert!(json["problems"].as_array().unwrap().is_empty());
}

#[test]
fn cli_config_reads_alternate_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alt.toml");
    std::fs::write(&path, "device_serial = \"SN-ALT\"\nread_count = 4\n").unwrap();

    cli()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("(loaded)"))
        .stdout(predicate::str::contains("SN-ALT"));
}

#[test]
fn cli_config_reports_problems() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "scan_capacity = 0\n").unwrap();

    let output = cli()
        .args(["--json", "config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let problems = json["problems"].as_array().unwrap();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].as_str().unwrap().contains("scan_capacity"));
}

#[test]
fn cli_verbose_flag_accepted() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .args(["-v", "config", "--config"])
        .arg(dir.path().join("none.toml"))
        .assert()
        .success();
}

#[test]
fn cli_read_with_invalid_size_fails_before_scanning() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .args(["read", "--size", "0", "--config"])
        .arg(dir.path().join("none.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("read_size"));
}

#[test]
fn cli_read_with_oversized_size_fails_before_scanning() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .args(["read", "--size", "18446744073709551615", "--config"])
        .arg(dir.path().join("none.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("read_size"));
}

#[test]
fn cli_devices_rejects_out_of_range_capacity() {
    let dir = tempfile::tempdir().unwrap();
    for capacity in ["0", "100000"] {
        cli()
            .args(["devices", "--capacity", capacity, "--config"])
            .arg(dir.path().join("none.toml"))
            .assert()
            .code(1)
            .stderr(predicate::str::contains("scan_capacity"));
    }
}

#[test]
fn cli_config_init_writes_file_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cli()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("(loaded)"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# usbtap configuration"));
    assert!(text.contains("read_size = 1024"));

    cli()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn cli_config_init_reports_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "").unwrap();
    cli()
        .args(["config", "--init", "--config"])
        .arg(blocker.join("config.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("I/O error"));
}
