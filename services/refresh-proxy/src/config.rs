//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The refresh and access tokens are loaded from REFRESH_TOKEN / ACCESS_TOKEN
//! or from `refresh_token_file` / `access_token_file`, never stored in the
//! TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const REFRESH_TOKEN_ENV: &str = "REFRESH_TOKEN";
pub const ACCESS_TOKEN_ENV: &str = "ACCESS_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub oauth: OAuthConfig,
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

/// Token endpoint and refresh trigger settings
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub token_endpoint: String,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Upstream statuses that mean "credential expired"
    #[serde(default = "default_refresh_status_codes")]
    pub refresh_status_codes: Vec<u16>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
}

/// Header to inject into proxied requests
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

impl From<&HeaderInjection> for transport::HeaderInjection {
    fn from(header: &HeaderInjection) -> Self {
        Self {
            name: header.name.clone(),
            value: header.value.clone(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_refresh_status_codes() -> Vec<u16> {
    vec![401]
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Token resolution order (each token independently):
    /// 1. REFRESH_TOKEN / ACCESS_TOKEN env var
    /// 2. refresh_token_file / access_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("upstream_url", &config.proxy.upstream_url)?;
        require_http_url("token_endpoint", &config.oauth.token_endpoint)?;

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

        if config.oauth.refresh_status_codes.is_empty() {
            return Err(common::Error::Config(
                "refresh_status_codes must not be empty".into(),
            ));
        }
        if let Some(code) = config
            .oauth
            .refresh_status_codes
            .iter()
            .find(|code| !(400..=499).contains(*code))
        {
            return Err(common::Error::Config(format!(
                "refresh_status_codes must be 4xx statuses, got: {code}"
            )));
        }

        config.oauth.refresh_token = common::resolve_secret(
            REFRESH_TOKEN_ENV,
            config.oauth.refresh_token_file.as_deref(),
        )?;
        config.oauth.access_token = common::resolve_secret(
            ACCESS_TOKEN_ENV,
            config.oauth.access_token_file.as_deref(),
        )?;

        Ok(config)
    }

    /// Take the refresh token, failing if neither source provided one.
    pub fn take_refresh_token(&mut self) -> common::Result<Secret<String>> {
        self.oauth
            .refresh_token
            .take()
            .ok_or(common::Error::MissingSecret {
                env_var: REFRESH_TOKEN_ENV,
                file_key: "refresh_token_file",
            })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-refresh-proxy.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_token_env() {
        unsafe {
            remove_env(REFRESH_TOKEN_ENV);
            remove_env(ACCESS_TOKEN_ENV);
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"

[[headers]]
name = "x-client"
value = "auth-refresh-proxy"
"#
    }

    /// Write `contents` to `<tmp>/<dir>/config.toml` and return (dir, path).
    fn write_config(dir: &str, contents: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config("refresh-proxy-test-valid", valid_toml());
        clear_token_env();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.proxy.upstream_url, "https://api.example.com");
        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(
            config.oauth.token_endpoint,
            "https://auth.example.com/oauth/token"
        );
        assert_eq!(config.oauth.refresh_status_codes, vec![401]);
        assert!(config.oauth.client_id.is_none());
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].name, "x-client");
        assert!(config.oauth.refresh_token.is_none());
        assert!(config.oauth.access_token.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let (dir, path) = write_config("refresh-proxy-test-invalid", "not valid {{{{ toml");

        let result = Config::load(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_tokens_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config("refresh-proxy-test-env", valid_toml());

        unsafe {
            set_env(REFRESH_TOKEN_ENV, "rt_env");
            set_env(ACCESS_TOKEN_ENV, "at_env");
        }
        let mut config = Config::load(&path).unwrap();
        assert_eq!(config.oauth.access_token.as_ref().unwrap().expose(), "at_env");
        assert_eq!(config.take_refresh_token().unwrap().expose(), "rt_env");
        clear_token_env();

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_refresh_token_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("refresh-proxy-test-tokenfile");
        std::fs::create_dir_all(&dir).unwrap();
        let token_path = dir.join("refresh_token");
        std::fs::write(&token_path, "rt_file\n").unwrap();

        let toml_content = format!(
            r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
client_id = "proxy-client"
refresh_token_file = "{}"
"#,
            token_path.display()
        );
        let config_path = dir.join("config.toml");
        std::fs::write(&config_path, &toml_content).unwrap();

        clear_token_env();
        let mut config = Config::load(&config_path).unwrap();
        assert_eq!(config.oauth.client_id.as_deref(), Some("proxy-client"));
        assert_eq!(config.take_refresh_token().unwrap().expose(), "rt_file");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_refresh_token_env_overrides_nonexistent_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let toml_content = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
refresh_token_file = "/nonexistent/path/refresh_token"
"#;
        let (dir, path) = write_config("refresh-proxy-test-env-over-missing", toml_content);

        unsafe { set_env(REFRESH_TOKEN_ENV, "rt_env_wins") };
        let mut config = Config::load(&path).unwrap();
        assert_eq!(
            config.take_refresh_token().unwrap().expose(),
            "rt_env_wins",
            "REFRESH_TOKEN env var must take precedence over refresh_token_file"
        );
        clear_token_env();

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_refresh_token_file_nonexistent_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let toml_content = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
refresh_token_file = "/nonexistent/path/refresh_token"
"#;
        let (dir, path) = write_config("refresh-proxy-test-missing-tokenfile", toml_content);

        clear_token_env();
        assert!(
            Config::load(&path).is_err(),
            "nonexistent refresh_token_file must return an error"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_refresh_token_is_reported() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config("refresh-proxy-test-no-token", valid_toml());

        clear_token_env();
        let mut config = Config::load(&path).unwrap();
        let err = config.take_refresh_token().unwrap_err();
        assert!(
            matches!(err, common::Error::MissingSecret { .. }),
            "got: {err}"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_custom_refresh_status_codes() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let toml_content = r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"
max_connections = 500

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
refresh_status_codes = [401, 403]
"#;
        let (dir, path) = write_config("refresh-proxy-test-codes", toml_content);
        clear_token_env();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.oauth.refresh_status_codes, vec![401, 403]);
        assert_eq!(config.proxy.max_connections, 500);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_config_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_token_env();

        let cases = [
            (
                "bad-upstream",
                r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
"#,
                "upstream_url must start with http",
            ),
            (
                "bad-endpoint",
                r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "auth.example.com/oauth/token"
"#,
                "token_endpoint must start with http",
            ),
            (
                "zero-timeout",
                r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"
timeout_secs = 0

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
"#,
                "timeout_secs",
            ),
            (
                "zero-maxconn",
                r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"
max_connections = 0

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
"#,
                "max_connections",
            ),
            (
                "empty-codes",
                r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
refresh_status_codes = []
"#,
                "must not be empty",
            ),
            (
                "server-error-code",
                r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://api.example.com"

[oauth]
token_endpoint = "https://auth.example.com/oauth/token"
refresh_status_codes = [401, 500]
"#,
                "must be 4xx",
            ),
        ];

        for (name, toml_content, expected) in cases {
            let (dir, path) = write_config(&format!("refresh-proxy-test-{name}"), toml_content);
            let err = Config::load(&path).unwrap_err().to_string();
            assert!(
                err.contains(expected),
                "{name}: expected '{expected}' in error, got: {err}"
            );
            std::fs::remove_dir_all(&dir).unwrap();
        }
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
        assert_eq!(path, PathBuf::from("auth-refresh-proxy.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
