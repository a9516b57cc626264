//! Integration tests for the Player CLI
//!
//! These tests run the actual binary and check its output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn player_cmd() -> Command {
    let mut cmd = Command::cargo_bin("player").unwrap();
    cmd.env_remove("PLAYER_LOG").env_remove("PLAYER_THROW_ERRORS");
    cmd
}

fn write_flow(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const SIGNUP_FLOW: &str = r#"
id: signup
views:
  - id: form
    title: "Welcome {{user.first}}"
    name:
      asset:
        id: name
        type: input
        binding: user.first
schema:
  ROOT:
    user:
      type: UserType
  UserType:
    first:
      type: StringType
      validation:
        - type: required
data:
  user: {}
"#;

#[test]
fn test_help_flag() {
    player_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("data-driven view resolution engine"))
        .stdout(predicate::str::contains("eval"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("validate"));
}

// ============================================================================
// eval
// ============================================================================

#[test]
fn test_eval_arithmetic() {
    player_cmd()
        .args(["eval", "1 + 2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Result:"))
        .stdout(predicate::str::contains("3"));
}

#[test]
fn test_eval_assignment_updates_data() {
    let temp_dir = TempDir::new().unwrap();
    let data = write_flow(&temp_dir, "data.json", r#"{"count": 41}"#);

    player_cmd()
        .args(["eval", "{{count}} = {{count}} + 1", "--data"])
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\": 42"));
}

#[test]
fn test_eval_syntax_error_fails() {
    player_cmd()
        .args(["eval", "1 +"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PLY-011"));
}

#[test]
fn test_eval_await_needs_async_flag() {
    player_cmd()
        .args(["eval", "await(1)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PLY-015"));

    player_cmd()
        .args(["eval", "--async", "await(1)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));
}

// ============================================================================
// resolve / validate
// ============================================================================

#[test]
fn test_resolve_prints_the_view() {
    let temp_dir = TempDir::new().unwrap();
    let flow = write_flow(&temp_dir, "signup.yaml", SIGNUP_FLOW);

    player_cmd()
        .arg("resolve")
        .arg(&flow)
        .args(["--set", "user.first=\"Ada\""])
        .assert()
        .success()
        .stdout(predicate::str::contains("Welcome Ada"));
}

#[test]
fn test_resolve_unknown_view_fails() {
    let temp_dir = TempDir::new().unwrap();
    let flow = write_flow(&temp_dir, "signup.yaml", SIGNUP_FLOW);

    player_cmd()
        .arg("resolve")
        .arg(&flow)
        .args(["--view", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PLY-080"));
}

#[test]
fn test_validate_blocks_on_missing_required_data() {
    let temp_dir = TempDir::new().unwrap();
    let flow = write_flow(&temp_dir, "signup.yaml", SIGNUP_FLOW);

    player_cmd()
        .arg("validate")
        .arg(&flow)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Navigation blocked by 1 validation(s)"))
        .stdout(predicate::str::contains("user.first"));
}

#[test]
fn test_validate_passes_once_data_is_set() {
    let temp_dir = TempDir::new().unwrap();
    let flow = write_flow(&temp_dir, "signup.yaml", SIGNUP_FLOW);

    player_cmd()
        .arg("validate")
        .arg(&flow)
        .args(["--set", "user.first=Ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("View can transition"));
}

#[test]
fn test_bad_config_flag_is_reported() {
    player_cmd()
        .env("PLAYER_THROW_ERRORS", "sometimes")
        .args(["eval", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PLY-080"))
        .stderr(predicate::str::contains("Fix:"));
}
