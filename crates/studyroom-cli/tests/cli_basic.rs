//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary with an isolated config directory and
//! verify outputs.

use std::path::Path;
use std::process::Command;

/// Run a CLI command as `user` and return (stdout, stderr, exit code).
fn run_cli(home: &Path, user: &str, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_studyroom-cli"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("STUDYROOM_USER", user)
        .env_remove("STUDYROOM_ENV")
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_ok(home: &Path, user: &str, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(home, user, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    stdout
}

fn create_session(home: &Path, user: &str, name: &str) -> String {
    let out = run_ok(home, user, &["session", "create", name]);
    out.lines()
        .find_map(|l| l.strip_prefix("Session created: "))
        .expect("no session id in output")
        .trim()
        .to_string()
}

#[test]
fn test_config_defaults_and_validation() {
    let home = tempfile::tempdir().unwrap();
    assert_eq!(run_ok(home.path(), "ada", &["config", "get", "timer.work_minutes"]).trim(), "25");

    run_ok(home.path(), "ada", &["config", "set", "presence.grace_secs", "120"]);
    assert_eq!(run_ok(home.path(), "ada", &["config", "get", "presence.grace_secs"]).trim(), "120");

    let (_, stderr, code) = run_cli(home.path(), "ada", &["config", "set", "timer.tick_millis", "0"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"));

    let path = run_ok(home.path(), "ada", &["config", "path"]);
    assert!(path.trim().ends_with("config.toml"));

    let presence: serde_json::Value =
        serde_json::from_str(&run_ok(home.path(), "ada", &["config", "list", "presence"])).unwrap();
    assert_eq!(presence["grace_secs"], 120);
    let (_, stderr, code) = run_cli(home.path(), "ada", &["config", "list", "nope"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("unknown section"));

    let check: serde_json::Value =
        serde_json::from_str(&run_ok(home.path(), "ada", &["config", "check"])).unwrap();
    assert_eq!(check["workSecs"], 1500);
    assert_eq!(check["presenceGraceSecs"], 120);
    assert_eq!(check["longBreakEvery"], 4);
    assert_eq!(check["video"], "local");
}

#[test]
fn test_session_lifecycle() {
    let home = tempfile::tempdir().unwrap();
    let id = create_session(home.path(), "ada", "Thermodynamics");

    let show = run_ok(home.path(), "ada", &["session", "show", &id]);
    let json: serde_json::Value = serde_json::from_str(&show).unwrap();
    assert_eq!(json["memberCount"], 0);
    assert_eq!(json["status"], "active");
    assert_eq!(json["timerState"], "stopped");

    let join = run_ok(home.path(), "bob", &["session", "join", &id]);
    let receipt: serde_json::Value = serde_json::from_str(&join).unwrap();
    assert!(receipt["token"].as_str().unwrap().split('.').count() == 3);
    assert_eq!(receipt["roomId"], id.as_str());

    let listed = run_ok(home.path(), "bob", &["session", "list"]);
    assert!(listed.contains(&id));

    let (_, stderr, code) = run_cli(home.path(), "bob", &["session", "delete", &id]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Unauthorized"));

    run_ok(home.path(), "ada", &["session", "delete", &id]);
    let (_, _, code) = run_cli(home.path(), "ada", &["session", "show", &id]);
    assert_ne!(code, 0);

    let deleted = run_ok(home.path(), "ada", &["session", "list", "--deleted"]);
    assert!(deleted.contains(&id));
}

#[test]
fn test_join_code_resolves() {
    let home = tempfile::tempdir().unwrap();
    let out = run_ok(home.path(), "ada", &["session", "create", "Statistics", "--private"]);
    let code = out
        .lines()
        .find_map(|l| l.strip_prefix("Join code: "))
        .unwrap()
        .trim()
        .to_string();
    let id = out
        .lines()
        .find_map(|l| l.strip_prefix("Session created: "))
        .unwrap()
        .trim()
        .to_string();

    assert_eq!(run_ok(home.path(), "bob", &["session", "resolve", &code]).trim(), id);
    assert_eq!(run_ok(home.path(), "bob", &["session", "list", "--public"]).trim(), "[]");
}

#[test]
fn test_simulate_prints_phase_events() {
    let home = tempfile::tempdir().unwrap();
    let out = run_ok(
        home.path(),
        "ada",
        &["simulate", "--phases", "2", "--work-secs", "2", "--break-secs", "1", "--long-break-secs", "2", "--tick-ms", "5"],
    );
    assert!(out.contains("\"type\":\"PhaseCompleted\""));
    assert!(out.contains("\"active_count\": 1"));
}
