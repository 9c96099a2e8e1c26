//! Configuration loading.
//!
//! Loads `config.toml` from `$CHATLINE_CONFIG_PATH` or `~/.chatline/`.
//! Environment variables override file values; file values override defaults.
//! The account password is never stored here, only the name of the variable
//! that holds it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::provider::PresenceStatus;
use crate::session::{DispatchMode, ReconnectPolicy, SecurityPosture, SessionOptions};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CHATLINE_CONFIG_PATH";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatlineConfig {
    /// Account to log in with.
    pub account: AccountConfig,
    /// Starting security posture.
    pub security: SecurityConfig,
    /// Initial presence.
    pub presence: PresenceConfig,
    /// Automatic restart after stream failure.
    pub reconnect: ReconnectConfig,
    /// Listener delivery.
    pub dispatch: DispatchConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl ChatlineConfig {
    /// Load with precedence env vars > TOML file > defaults.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = config_path_with(env)?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config at {}", path.display()))
            }
        }
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or unknown enum values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides through `env`.
    ///
    /// Takes a resolver so tests need not mutate the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CHATLINE_SERVER") {
            self.account.server = v;
        }
        if let Some(v) = env("CHATLINE_USERNAME") {
            self.account.username = v;
        }
        if let Some(v) = env("CHATLINE_PASSWORD_ENV") {
            self.account.password_env = v;
        }
        if let Some(v) = env("CHATLINE_DISPATCH_MODE") {
            match v.parse() {
                Ok(mode) => self.dispatch.mode = mode,
                Err(_) => tracing::warn!(
                    var = "CHATLINE_DISPATCH_MODE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("CHATLINE_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Translate into options for a session manager.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            posture: self.security.posture(),
            presence: self.presence.status,
            status_message: self.presence.status_message.clone(),
            reconnect: self.reconnect.policy(),
            dispatch: self.dispatch.mode,
            ..SessionOptions::default()
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// Account identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Server address (`host` or `host:port`).
    pub server: String,
    /// Account username.
    pub username: String,
    /// Environment variable (or secrets-file key) holding the password.
    pub password_env: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            username: String::new(),
            password_env: "CHATLINE_PASSWORD".to_owned(),
        }
    }
}

/// Starting point of the security fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require an encrypted transport.
    pub require_tls: bool,
    /// Attempt STARTTLS.
    pub starttls: bool,
    /// Permit authentication over an unencrypted stream.
    pub allow_insecure_auth: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let strict = SecurityPosture::STRICT;
        Self {
            require_tls: strict.require_tls,
            starttls: strict.starttls,
            allow_insecure_auth: strict.allow_insecure_auth,
        }
    }
}

impl SecurityConfig {
    /// As a posture value.
    pub fn posture(&self) -> SecurityPosture {
        SecurityPosture::new(self.require_tls, self.starttls, self.allow_insecure_auth)
    }
}

/// Initial presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Availability (`online`, `chat`, `away`, `xa`, `dnd`).
    pub status: PresenceStatus,
    /// Free-form status message.
    pub status_message: String,
}

/// Automatic restart settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether to restart after a stream failure.
    pub enabled: bool,
    /// Delay before the first restart, in seconds.
    pub initial_delay_secs: u64,
    /// Growth factor per consecutive failed restart.
    pub multiplier: f64,
    /// Cap on a single delay, in seconds.
    pub max_delay_secs: u64,
    /// Additive jitter fraction.
    pub jitter: f64,
    /// Consecutive attempts before giving up. Absent means unlimited.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            enabled: policy.enabled,
            initial_delay_secs: policy.initial_delay.as_secs(),
            multiplier: policy.multiplier,
            max_delay_secs: policy.max_delay.as_secs(),
            jitter: policy.jitter,
            max_attempts: policy.max_attempts,
        }
    }
}

impl ReconnectConfig {
    /// As a policy value.
    ///
    /// A non-finite or sub-1 multiplier becomes `1.0` (fixed delay); a
    /// non-finite or negative jitter becomes `0.0`.
    pub fn policy(&self) -> ReconnectPolicy {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let jitter = if self.jitter.is_finite() && self.jitter > 0.0 {
            self.jitter.min(1.0)
        } else {
            0.0
        };
        ReconnectPolicy {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            multiplier,
            max_delay: Duration::from_secs(self.max_delay_secs.max(self.initial_delay_secs)),
            jitter,
            max_attempts: self.max_attempts,
            enabled: self.enabled,
        }
    }
}

/// Listener delivery settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// `concurrent` or `ordered`.
    pub mode: DispatchMode,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for JSON log files. Console only when absent.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────

/// Resolve the default config directory (`~/.chatline/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".chatline"))
}

/// Resolve the config file path using a custom env resolver.
///
/// # Errors
///
/// Returns an error if no explicit path is set and the home directory cannot
/// be determined.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Secrets file that sits beside `config_file`.
pub fn secrets_path_for(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .map_or_else(|| PathBuf::from(".env"), |dir| dir.join(".env"))
}
