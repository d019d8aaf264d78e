//! Integration tests for the `ulgate` CLI binary.
//!
//! Argument parsing, payload decoding and configuration handling, all
//! without binding ports or reaching a broker.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `ulgate` binary with env isolation.
///
/// Points config directories at a nonexistent path so tests never read
/// the user's real configuration.
fn ulgate_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ulgate");
    cmd.env("HOME", "/tmp/ulgate-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/ulgate-cli-test-nonexistent")
        .env_remove("ULGATE_CONFIG")
        .env_remove("ULGATE_LOG_FORMAT")
        .env_remove("ULGATE_HTTP__PORT")
        .env_remove("ULGATE_MQTT__ENABLED")
        .env_remove("ULGATE_MQTT__PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = ulgate_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_subcommands() {
    ulgate_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("config"))
            .and(predicate::str::contains("decode"))
            .and(predicate::str::contains("completions")),
    );
}

#[test]
fn test_version_flag() {
    ulgate_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ulgate"));
}

#[test]
fn test_completions_zsh() {
    ulgate_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_bash() {
    ulgate_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Decode ──────────────────────────────────────────────────────────

#[test]
fn test_decode_ultralight_groups() {
    ulgate_cmd()
        .args(["decode", "t|21#h|40"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"t\"")
                .and(predicate::str::contains("21"))
                .and(predicate::str::contains("\"h\"")),
        );
}

#[test]
fn test_decode_single_value_with_attr() {
    ulgate_cmd()
        .args(["decode", "--attr", "temperature", "23.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"temperature\""));
}

#[test]
fn test_decode_json_array() {
    ulgate_cmd()
        .args(["decode", "--encoding", "json", r#"[{"t":1},{"t":2}]"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"t\": 1").and(predicate::str::contains("\"t\": 2")));
}

#[test]
fn test_decode_compact_expands_fields() {
    ulgate_cmd()
        .args(["decode", "-e", "compact", "P1|214,7,d22,b00,-64,"])
        .assert()
        .success()
        .stdout(predicate::str::contains("P1_3").and(predicate::str::contains("3362")));
}

#[test]
fn test_decode_malformed_json_exits_with_data_code() {
    ulgate_cmd()
        .args(["decode", "--encoding", "json", "{not json"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("decode"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    ulgate_cmd()
        .args(["config", "path", "--config", "/etc/ulgate/gw.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/ulgate/gw.toml"));
}

#[test]
fn test_config_check_counts_static_records() {
    let file = config_file(
        "[agent]\nservice = \"smartcity\"\n\n[[groups]]\napi_key = \"abc\"\n\n[[devices]]\nid = \"dev1\"\n",
    );
    ulgate_cmd()
        .args(["config", "check", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 group(s), 1 device(s)"));
}

#[test]
fn test_config_check_rejects_zero_port() {
    let file = config_file("[http]\nport = 0\n");
    ulgate_cmd()
        .args(["config", "check", "--config"])
        .arg(file.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("http.port"));
}

#[test]
fn test_config_check_missing_file() {
    ulgate_cmd()
        .args(["config", "check", "--config", "/tmp/ulgate-cli-test-nonexistent/none.toml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_show_defaults_without_file() {
    ulgate_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[agent]").and(predicate::str::contains("7896")));
}

#[test]
fn test_config_show_masks_password() {
    let file = config_file("[mqtt]\nusername = \"iota\"\npassword = \"hunter2\"\n");
    ulgate_cmd()
        .args(["config", "show", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not().and(predicate::str::contains("iota")));
}

#[test]
fn test_env_overrides_config_file() {
    let file = config_file("[http]\nport = 7000\n");
    ulgate_cmd()
        .args(["config", "show", "--config"])
        .arg(file.path())
        .env("ULGATE_HTTP__PORT", "7100")
        .assert()
        .success()
        .stdout(predicate::str::contains("7100"));
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_refuses_invalid_config() {
    let file = config_file("[context_broker]\nurl = \"not a url\"\n");
    ulgate_cmd()
        .args(["run", "--config"])
        .arg(file.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("context_broker.url"));
}
