//! Load `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml` (falls back to the
//! platform config directory via `dirs` when `XDG_CONFIG_HOME` is unset).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn xdg_config_path(app_name: &str) -> Option<PathBuf> {
    let config_dir = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else {
        dirs::config_dir()?
    };
    let path = config_dir.join(app_name).join("config.toml");
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns env key-value pairs from `[env]` section. Missing file or empty section returns empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = match xdg_config_path(app_name) {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn missing_config_returns_empty_map() {
        let map = load_env_map("agentbridge-test-nonexistent-app-12345").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn load_env_map_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("testapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nFOO = \"from_toml\"\nBAR = \"baz\"\n",
        )
        .unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir.path());
        let result = load_env_map("testapp");
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }

        let map = result.unwrap();
        assert_eq!(map.get("FOO"), Some(&"from_toml".to_string()));
        assert_eq!(map.get("BAR"), Some(&"baz".to_string()));
    }

    #[test]
    fn invalid_toml_returns_xdg_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("badapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "not valid toml [[[\n").unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir.path());
        let result = load_env_map("badapp");
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }

        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
