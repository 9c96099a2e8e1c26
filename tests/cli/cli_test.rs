//! CLI contract tests.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

fn chatline(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("chatline").expect("binary should build");
    cmd.arg("--config")
        .arg(config)
        .env("CHATLINE_PASSWORD", "demo-password")
        .env("RUST_LOG", "warn")
        .env_remove("CHATLINE_SERVER")
        .env_remove("CHATLINE_USERNAME")
        .env_remove("CHATLINE_DISPATCH_MODE");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("binary should run");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn config_prints_resolved_settings() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    fs::write(
        &path,
        "[account]\nserver = \"chat.example.com\"\n\n[dispatch]\nmode = \"ordered\"\n",
    )
    .expect("write config");

    let stdout = stdout_of(chatline(&path).arg("config"));

    assert!(stdout.contains("server = \"chat.example.com\""));
    assert!(stdout.contains("mode = \"ordered\""));
    assert!(stdout.contains("status = \"xa\""));
}

#[test]
fn config_rejects_malformed_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    fs::write(&path, "[account\n").expect("write config");

    chatline(&path).arg("config").assert().failure();
}

#[test]
fn demo_exchanges_messages_and_reports_status() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");

    let stdout = stdout_of(chatline(&path).args(["demo", "--messages", "2"]));

    assert!(stdout.contains("* connected"));
    assert!(stdout.contains("<echo@loopback.local> [loopback] ping 1"));
    assert!(stdout.contains("\"running\": true"));
    assert!(stdout.contains("* disconnected"));
}

#[test]
fn demo_recovers_from_dropped_stream() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");

    let stdout = stdout_of(chatline(&path).args([
        "demo",
        "--messages",
        "1",
        "--drop-stream",
        "--reconnect-delay-secs",
        "0",
    ]));

    assert_eq!(stdout.matches("* connected").count(), 2);
    assert!(stdout.contains("\"reconnect_attempts\": 0"));
}
