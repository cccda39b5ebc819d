//! Load configuration for the gateway process.
//!
//! Two layers:
//!
//! - [`load_and_apply`]: merges `.env` and XDG `config.toml` `[env]` tables into the
//!   process environment, without overwriting variables already set. Priority:
//!   **existing env > `.env` > XDG config.toml**.
//! - [`Config::from_env`]: reads the typed gateway configuration (§6.5) out of the
//!   process environment after `load_and_apply` has run, applying built-in defaults
//!   for anything still unset.

mod dotenv;
mod xdg_toml;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets environment
/// variables only for keys that are **not** already set (so existing env has highest priority).
///
/// * `app_name`: used for the XDG path `~/.config/<app_name>/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` in this directory instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// Errors parsing a typed value out of the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field}: {value:?}: {source}")]
    InvalidField {
        field: &'static str,
        value: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|e| ConfigError::InvalidField {
            field: key,
            value: v,
            source: Box::new(e),
        }),
    }
}

/// Gateway process configuration (spec §6.5).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    /// If non-empty, required `Authorization: Bearer` on `/v1/*`.
    pub api_key: Option<String>,
    /// If non-empty, required bearer token on `/ws`.
    pub agent_secret_key: Option<String>,
    pub cors_origin: String,
    pub log_level: String,
    /// Requests per minute per client IP on `/v1/*`.
    pub rate_limit_max: u32,
    /// Default per-request broker deadline.
    pub broker_deadline_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_path: PathBuf::from("agentbridge.db"),
            api_key: None,
            agent_secret_key: None,
            cors_origin: "*".to_string(),
            log_level: "info".to_string(),
            rate_limit_max: 60,
            broker_deadline_ms: 120_000,
        }
    }
}

impl Config {
    /// Builds configuration from the process environment (call [`load_and_apply`] first
    /// so `.env`/XDG values have already been merged in). Unset variables fall back to
    /// [`Config::default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        Ok(Config {
            host: env_var("AGENTBRIDGE_HOST").unwrap_or(defaults.host),
            port: parse_env("AGENTBRIDGE_PORT", defaults.port)?,
            database_path: env_var("AGENTBRIDGE_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            api_key: env_var("AGENTBRIDGE_API_KEY"),
            agent_secret_key: env_var("AGENTBRIDGE_AGENT_SECRET_KEY"),
            cors_origin: env_var("AGENTBRIDGE_CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            log_level: env_var("AGENTBRIDGE_LOG_LEVEL").unwrap_or(defaults.log_level),
            rate_limit_max: parse_env("AGENTBRIDGE_RATE_LIMIT_MAX", defaults.rate_limit_max)?,
            broker_deadline_ms: parse_env(
                "AGENTBRIDGE_BROKER_DEADLINE_MS",
                defaults.broker_deadline_ms,
            )?,
        })
    }

    /// Convenience: `.env` + XDG merge followed by [`Config::from_env`].
    pub fn load(app_name: &str, override_dir: Option<&Path>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        load_and_apply(app_name, override_dir)?;
        Ok(Self::from_env()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn clear_env() {
        for key in [
            "AGENTBRIDGE_HOST",
            "AGENTBRIDGE_PORT",
            "AGENTBRIDGE_DATABASE_PATH",
            "AGENTBRIDGE_API_KEY",
            "AGENTBRIDGE_AGENT_SECRET_KEY",
            "AGENTBRIDGE_CORS_ORIGIN",
            "AGENTBRIDGE_LOG_LEVEL",
            "AGENTBRIDGE_RATE_LIMIT_MAX",
            "AGENTBRIDGE_BROKER_DEADLINE_MS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_when_unset() {
        clear_env();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.rate_limit_max, 60);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn reads_typed_overrides() {
        clear_env();
        env::set_var("AGENTBRIDGE_PORT", "9999");
        env::set_var("AGENTBRIDGE_API_KEY", "sk-test");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.api_key.as_deref(), Some("sk-test"));
        clear_env();
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        clear_env();
        env::set_var("AGENTBRIDGE_PORT", "not-a-number");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "AGENTBRIDGE_PORT", .. }));
        clear_env();
    }

    #[test]
    fn existing_env_wins_over_dotenv_and_xdg() {
        env::set_var("CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("agentbridge", None);
        assert_eq!(env::var("CONFIG_TEST_EXISTING").as_deref(), Ok("from_env"));
        env::remove_var("CONFIG_TEST_EXISTING");
    }
}
