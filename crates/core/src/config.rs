//! TOML-based configuration system for consolesync.
//!
//! The password is never stored in the file; `credentials.password_env`
//! names an environment variable that is resolved at runtime via
//! [`AppConfig::resolve_env_vars`]. Every section has defaults, so an empty
//! file (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{DEFAULT_VERSION, PROTECTED_DIRS};
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP transport settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logon credentials.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Merge pipeline settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Known servers offered for selection.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Transport settings shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Use `https://` (default) or plain `http://`.
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Path prefix in front of every API route.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Accept self-signed server certificates (default true).
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    /// Per-request timeout. Unset means the transport default (none).
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}
fn default_api_prefix() -> String {
    "/mvcm-api".into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            use_tls: true,
            api_prefix: default_api_prefix(),
            accept_invalid_certs: true,
            request_timeout_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Logon credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Default user id for logon.
    #[serde(default)]
    pub username: Option<String>,

    /// Environment variable holding the logon password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_password_env() -> String {
    "CONSOLESYNC_PASSWORD".into()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: None,
            password_env: default_password_env(),
            password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Tool version embedded in merged archive names.
    #[serde(default = "default_version")]
    pub version: String,

    /// Top-level directories always taken from the target.
    #[serde(default = "default_protected_dirs")]
    pub protected_dirs: Vec<String>,

    /// Parent directory for the per-run temporary workspace
    /// (default: the OS temporary directory).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Keep a copy of every merged archive in this directory.
    #[serde(default)]
    pub keep_archive_dir: Option<PathBuf>,

    /// Delete the `source_Merge` / `target_Merge` staging configurations
    /// after the upload.
    #[serde(default)]
    pub delete_staging_after: bool,
}

fn default_version() -> String {
    DEFAULT_VERSION.into()
}
fn default_protected_dirs() -> Vec<String> {
    PROTECTED_DIRS.iter().map(|d| d.to_string()).collect()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            protected_dirs: default_protected_dirs(),
            work_dir: None,
            keep_archive_dir: None,
            delete_staging_after: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily-rotated log file into this directory.
    #[serde(default)]
    pub file_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

/// One entry of the server inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEntry {
    /// Human label such as "DR - Chandler".
    pub environment: String,
    /// Fully qualified host name.
    pub hostname: String,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(servers = config.servers.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the password variable named by `credentials.password_env`.
    ///
    /// A missing variable only logs a warning; the CLI falls back to an
    /// interactive prompt.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.credentials.password =
            resolve_optional_env(&self.credentials.password_env, "credentials.password_env");
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.client.api_prefix.is_empty() && !self.client.api_prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "client.api_prefix".into(),
                detail: "API prefix must start with '/'".into(),
            });
        }
        if self.client.request_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "client.request_timeout_secs".into(),
                detail: "timeout must be > 0 when set".into(),
            });
        }
        if self.merge.version.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "merge.version".into(),
                detail: "version must not be empty".into(),
            });
        }
        for dir in &self.merge.protected_dirs {
            if dir.is_empty()
                || dir.contains('/')
                || dir.contains('\\')
                || dir == "."
                || dir == ".."
            {
                return Err(ConfigError::InvalidValue {
                    field: "merge.protected_dirs".into(),
                    detail: format!("'{}' is not a top-level directory name", dir),
                });
            }
        }
        for server in &self.servers {
            if server.hostname.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "servers.hostname".into(),
                    detail: format!("server '{}' has an empty hostname", server.environment),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Look a server up by environment label or host name.
    pub fn find_server(&self, key: &str) -> Option<&ServerEntry> {
        self.servers
            .iter()
            .find(|s| s.hostname.eq_ignore_ascii_case(key) || s.environment == key)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[client]
use_tls = false
api_prefix = "/mvcm-api"
accept_invalid_certs = false
request_timeout_secs = 30

[credentials]
username = "ops"
password_env = "TEST_CONSOLE_PW"

[merge]
version = "4.2.00"
protected_dirs = ["licensemanager", "tomcat"]
keep_archive_dir = "/tmp/merged"
delete_staging_after = true

[logging]
level = "debug"

[[servers]]
environment = "DR - Chandler"
hostname = "qdl2.example.com"

[[servers]]
environment = "DR - Omaha"
hostname = "syl2.example.com"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert!(!config.client.use_tls);
        assert_eq!(config.client.request_timeout_secs, Some(30));
        assert_eq!(config.credentials.username.as_deref(), Some("ops"));
        assert_eq!(config.merge.version, "4.2.00");
        assert_eq!(config.merge.protected_dirs, vec!["licensemanager", "tomcat"]);
        assert!(config.merge.delete_staging_after);
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1].environment, "DR - Omaha");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.client.use_tls);
        assert!(config.client.accept_invalid_certs);
        assert_eq!(config.client.api_prefix, "/mvcm-api");
        assert_eq!(config.client.request_timeout_secs, None);
        assert_eq!(config.credentials.password_env, "CONSOLESYNC_PASSWORD");
        assert_eq!(config.merge.version, "4.1.05");
        assert_eq!(
            config.merge.protected_dirs,
            vec!["licensemanager", "tomcat", "security"]
        );
        assert!(!config.merge.delete_staging_after);
        assert_eq!(config.logging.level, "warn");
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_validate_rejects_nested_protected_dir() {
        let mut config = AppConfig::default();
        config.merge.protected_dirs = vec!["tomcat/conf".into()];
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.protected_dirs"
        ));
    }

    #[test]
    fn test_validate_rejects_dot_protected_dirs() {
        for bad in [".", ".."] {
            let mut config = AppConfig::default();
            config.merge.protected_dirs = vec!["tomcat".into(), bad.into()];
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.protected_dirs"
            ));
        }
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = AppConfig::default();
        config.client.api_prefix = "mvcm-api".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "client.api_prefix"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_CONSOLE_PW_RESOLVE", "s3cret");
        let mut config = AppConfig::default();
        config.credentials.password_env = "TEST_CONSOLE_PW_RESOLVE".into();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.credentials.password.as_deref(), Some("s3cret"));
        std::env::remove_var("TEST_CONSOLE_PW_RESOLVE");
    }

    #[test]
    fn test_find_server() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(
            config.find_server("DR - Omaha").map(|s| s.hostname.as_str()),
            Some("syl2.example.com")
        );
        assert!(config.find_server("QDL2.EXAMPLE.COM").is_some());
        assert!(config.find_server("unknown").is_none());
    }
}
