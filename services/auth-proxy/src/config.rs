//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The credential itself never appears in the TOML; only the path of the
//! file it is read from (`credential_file`, or `AUTHGATE_TOKEN_FILE`).

use dispatch::DispatcherConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var overriding `auth.credential_file`.
const TOKEN_FILE_ENV: &str = "AUTHGATE_TOKEN_FILE";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Credential source and re-authorization behaviour
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// File holding the current bearer token, re-read on every authorization.
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
    #[serde(default = "default_authorize_timeout")]
    pub authorize_timeout_secs: u64,
    #[serde(flatten)]
    pub dispatcher: DispatcherConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_file: None,
            authorize_timeout_secs: default_authorize_timeout(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// Header to inject into proxied requests
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_authorize_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.proxy.upstream_url.starts_with("http://")
            && !config.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.proxy.upstream_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.auth.authorize_timeout_secs == 0 {
            return Err(common::Error::Config(
                "authorize_timeout_secs must be greater than 0".into(),
            ));
        }

        // Env var takes precedence over the file setting
        if let Ok(path) = std::env::var(TOKEN_FILE_ENV) {
            config.auth.credential_file = Some(PathBuf::from(path));
        }
        if config.auth.credential_file.is_none() {
            return Err(common::Error::Config(format!(
                "auth.credential_file must be set (or {TOKEN_FILE_ENV})"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("authgate-proxy.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that read or mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[auth]
credential_file = "/run/secrets/upstream-token"

[[headers]]
name = "x-client"
value = "authgate"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(TOKEN_FILE_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.proxy.upstream_url, "https://api.example.com");
        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(config.auth.authorize_timeout_secs, 30);
        assert!(!config.auth.dispatcher.also_intercept_forbidden);
        assert_eq!(
            config.auth.credential_file,
            Some(PathBuf::from("/run/secrets/upstream-token"))
        );
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].name, "x-client");
    }

    #[test]
    fn test_load_intercept_forbidden() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(TOKEN_FILE_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "http://localhost:9000"

[auth]
credential_file = "/tmp/token"
also_intercept_forbidden = true
authorize_timeout_secs = 5
"#,
        );

        let config = Config::load(&path).unwrap();
        assert!(config.auth.dispatcher.also_intercept_forbidden);
        assert_eq!(config.auth.authorize_timeout_secs, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_rejects_non_http_upstream() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &valid_toml().replace("https://api.example.com", "ftp://api.example.com"),
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("upstream_url"), "got: {err}");
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(
            &dir,
            &valid_toml().replace(
                "upstream_url = \"https://api.example.com\"",
                "upstream_url = \"https://api.example.com\"\ntimeout_secs = 0",
            ),
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "got: {err}");

        let path = write_config(
            &dir,
            &valid_toml().replace(
                "[auth]\n",
                "[auth]\nauthorize_timeout_secs = 0\n",
            ),
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("authorize_timeout_secs"), "got: {err}");
    }

    #[test]
    fn test_rejects_zero_max_connections() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &valid_toml().replace(
                "upstream_url = \"https://api.example.com\"",
                "upstream_url = \"https://api.example.com\"\nmax_connections = 0",
            ),
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("max_connections"), "got: {err}");
    }

    #[test]
    fn test_requires_credential_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(TOKEN_FILE_ENV) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"
"#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("credential_file"), "got: {err}");
    }

    #[test]
    fn test_credential_file_env_overrides_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env(TOKEN_FILE_ENV, "/var/run/token-from-env") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(TOKEN_FILE_ENV) };

        assert_eq!(
            config.auth.credential_file,
            Some(PathBuf::from("/var/run/token-from-env"))
        );
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("authgate-proxy.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }
}
