//! Coverage for config parsing, loading and path resolution.

use std::fs;
use std::time::Duration;

use chatline::config::{config_dir, ChatlineConfig};
use chatline::provider::PresenceStatus;
use chatline::session::{DispatchMode, SecurityPosture};

#[test]
fn config_dir_resolves() {
    let path = match config_dir() {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".chatline"));
}

#[test]
fn missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("absent.toml");

    let config = ChatlineConfig::load_from(&path).expect("missing file is not an error");

    assert_eq!(config, ChatlineConfig::default());
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[account]
server = "chat.example.com:5222"
username = "me@example.com"
password_env = "MY_CHAT_PASSWORD"

[security]
require_tls = false
starttls = true
allow_insecure_auth = false

[presence]
status = "dnd"
status_message = "heads down"

[reconnect]
initial_delay_secs = 2
multiplier = 3.0
max_delay_secs = 60
jitter = 0.0
max_attempts = 4

[dispatch]
mode = "ordered"

[logging]
level = "debug"
dir = "/var/log/chatline"
"#;
    let config = ChatlineConfig::from_toml(toml_str).expect("config should parse");

    assert_eq!(config.account.server, "chat.example.com:5222");
    assert_eq!(config.account.password_env, "MY_CHAT_PASSWORD");
    assert_eq!(
        config.security.posture(),
        SecurityPosture::new(false, true, false)
    );
    assert_eq!(config.presence.status, PresenceStatus::Dnd);
    assert_eq!(config.dispatch.mode, DispatchMode::Ordered);
    assert_eq!(config.logging.level, "debug");

    let options = config.session_options();
    assert_eq!(options.status_message, "heads down");
    assert_eq!(options.reconnect.initial_delay, Duration::from_secs(2));
    assert_eq!(options.reconnect.max_attempts, Some(4));
    assert_eq!(options.reconnect.base_delay(2), Some(Duration::from_secs(6)));
    assert_eq!(options.reconnect.base_delay(5), None);
}

#[test]
fn extended_away_is_spelled_xa() {
    let config = ChatlineConfig::from_toml("[presence]\nstatus = \"xa\"\n")
        .expect("config should parse");
    assert_eq!(config.presence.status, PresenceStatus::ExtendedAway);
}

#[test]
fn unknown_dispatch_mode_is_rejected() {
    let result = ChatlineConfig::from_toml("[dispatch]\nmode = \"sideways\"\n");
    assert!(result.is_err());
}

#[test]
fn load_from_file_then_override() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    fs::write(&path, "[account]\nserver = \"file.example.com\"\n").expect("write config");

    let mut config = ChatlineConfig::load_from(&path).expect("config should load");
    config.apply_overrides(|key| (key == "CHATLINE_LOG_LEVEL").then(|| "trace".to_owned()));

    assert_eq!(config.account.server, "file.example.com");
    assert_eq!(config.logging.level, "trace");
}

#[test]
fn malformed_file_is_an_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    fs::write(&path, "[account\nserver = ").expect("write config");

    let err = ChatlineConfig::load_from(&path).expect_err("parse should fail");
    assert!(err.to_string().contains("failed to parse config"));
}

#[test]
fn rendered_config_parses_back() {
    let config = ChatlineConfig::default();
    let rendered = toml::to_string_pretty(&config).expect("config should render");
    let parsed = ChatlineConfig::from_toml(&rendered).expect("rendered config should parse");
    assert_eq!(parsed, config);
}
