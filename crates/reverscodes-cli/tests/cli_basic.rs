//! Basic CLI E2E tests.
//!
//! Each test runs the built binary with `HOME` pointed at a temporary
//! directory, so config and quota state start empty.

use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &TempDir, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_reverscodes"))
        .args(args)
        .env("HOME", home.path())
        .env_remove("REVERSCODES_ENV")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn status_json(home: &TempDir) -> serde_json::Value {
    let (code, stdout, stderr) = run_cli(home, &["gate", "status", "--json"]);
    assert_eq!(code, 0, "gate status failed: {stderr}");
    serde_json::from_str(&stdout).expect("status is JSON")
}

#[test]
fn test_fresh_status_offers_full_quota() {
    let home = TempDir::new().unwrap();
    let status = status_json(&home);
    assert_eq!(status["record"]["deferral_count"], 0);
    assert_eq!(status["remaining"], 3);
    assert_eq!(status["decision"]["action"], "prompt");
}

#[test]
fn test_defer_until_exhausted_then_reset() {
    let home = TempDir::new().unwrap();
    for _ in 0..3 {
        let (code, stdout, _) = run_cli(&home, &["gate", "defer"]);
        assert_eq!(code, 0);
        assert!(stdout.contains("Deferred"));
    }

    let (code, _, stderr) = run_cli(&home, &["gate", "defer"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("no deferrals left"));

    let status = status_json(&home);
    assert_eq!(status["record"]["deferral_count"], 3);
    assert_eq!(status["remaining"], 0);
    // The last deferral's cooldown is still running.
    assert_eq!(status["decision"]["action"], "suppressed");

    let (code, _, _) = run_cli(&home, &["gate", "reset"]);
    assert_eq!(code, 0);
    let status = status_json(&home);
    assert_eq!(status["record"]["deferral_count"], 0);
    assert!(status["record"]["defer_until"].is_null());
}

#[test]
fn test_config_get_and_set() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(&home, &["config", "get", "quota.max_deferrals"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "3");

    let (code, _, _) = run_cli(&home, &["config", "set", "quota.max_deferrals", "5"]);
    assert_eq!(code, 0);
    assert_eq!(status_json(&home)["remaining"], 5);

    let (code, _, stderr) = run_cli(&home, &["config", "get", "quota.nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_config_set_rejects_bad_value() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(&home, &["config", "set", "quota.max_deferrals", "lots"]);
    assert_eq!(code, 1);
    assert!(stderr.starts_with("error:"));
}

#[test]
fn test_comment_validation_happens_before_any_request() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(
        &home,
        &[
            "comments",
            "post",
            "--nickname",
            "x",
            "hello world",
            "--endpoint",
            "http://127.0.0.1:1/comments",
        ],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("nickname"));
}

#[test]
fn test_config_list_plain_and_json() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(&home, &["config", "list"]);
    assert_eq!(code, 0);
    let line = stdout
        .lines()
        .find(|l| l.starts_with("quota.max_deferrals"))
        .expect("quota.max_deferrals listed");
    assert!(line.ends_with("= 3"));

    let (code, stdout, _) = run_cli(&home, &["config", "list", "--json"]);
    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("list is JSON");
    assert_eq!(json["quota"]["max_deferrals"], 3);
}
