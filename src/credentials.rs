//! Account credentials and password resolution.
//!
//! The password never lives in `config.toml`. The config names an environment
//! variable; if that variable is unset the value is looked up in a private
//! `.env` file next to the config.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

/// Immutable login identity for one account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    server: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials for `username` on `server`.
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Server address.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Account username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Load key-value secrets from a private `.env` file.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_secrets(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "secrets file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read secrets at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in secrets file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(vars)
}

/// Resolve the account password named by `password_env`.
///
/// Looks in the environment first (through `env`, so tests need not touch the
/// process environment), then in `secrets_file` when given and present.
///
/// # Errors
///
/// Returns an error when the password is found nowhere or the secrets file is
/// invalid.
pub fn resolve_password(
    password_env: &str,
    env: impl Fn(&str) -> Option<String>,
    secrets_file: Option<&Path>,
) -> anyhow::Result<String> {
    if let Some(value) = env(password_env).filter(|v| !v.is_empty()) {
        debug!(var = password_env, "password resolved from environment");
        return Ok(value);
    }

    if let Some(path) = secrets_file.filter(|p| p.exists()) {
        let secrets = load_secrets(path)?;
        if let Some(value) = secrets.get(password_env).filter(|v| !v.is_empty()) {
            debug!(var = password_env, path = %path.display(), "password resolved from secrets file");
            return Ok(value.clone());
        }
    }

    Err(anyhow::anyhow!(
        "password not found: set {password_env} in the environment or the secrets file"
    ))
}

/// Restrict a file to owner read/write when supported.
///
/// # Errors
///
/// Returns an error if permissions cannot be updated.
pub fn enforce_private_file_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect secrets file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "secrets file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
