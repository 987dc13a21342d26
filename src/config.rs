use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "BUMAVIEW";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Bearer token for submitting questions, answers, and comments.
    /// Browsing works without one.
    #[serde(default)]
    pub token: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            token: String::new(),
        }
    }
}

fn default_base_url() -> String {
    crate::api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    "bumaview-tui/0.1 (+https://github.com/bumaview/bumaview-tui)".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_company_ttl", with = "humantime_serde")]
    pub company_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            company_ttl: default_company_ttl(),
        }
    }
}

fn default_db_path() -> Option<PathBuf> {
    crate::storage::default_path()
}

fn default_company_ttl() -> Duration {
    crate::directory::DEFAULT_TTL
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            page_size: default_page_size(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

fn default_page_size() -> u32 {
    crate::feed::DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() && other.api.base_url != default_base_url() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() && other.api.user_agent != default_user_agent() {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.token.is_empty() {
        base.api.token = other.api.token;
    }

    if other.cache.db_path.is_some() && other.cache.db_path != default_db_path() {
        base.cache.db_path = other.cache.db_path;
    }
    if other.cache.company_ttl != default_company_ttl() {
        base.cache.company_ttl = other.cache.company_ttl;
    }

    if !other.ui.theme.is_empty() && other.ui.theme != default_theme() {
        base.ui.theme = other.ui.theme;
    }
    if other.ui.page_size != 0 && other.ui.page_size != default_page_size() {
        base.ui.page_size = other.ui.page_size;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.token" => cfg.api.token = value,
        "cache.db_path" => cfg.cache.db_path = Some(PathBuf::from(value)),
        "cache.company_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.cache.company_ttl = duration;
            }
        }
        "ui.theme" => cfg.ui.theme = value,
        "ui.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                if parsed > 0 {
                    cfg.ui.page_size = parsed;
                }
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bumaview").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("BUMAVIEW_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.ui.page_size, 20);
        assert_eq!(cfg.api.base_url, default_base_url());
        assert_eq!(cfg.cache.company_ttl, Duration::from_secs(30 * 60));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://staging.example.net/\n  token: abc123\ncache:\n  company_ttl: 5m\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("BUMAVIEW_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://staging.example.net/");
        assert_eq!(cfg.api.token, "abc123");
        assert_eq!(cfg.cache.company_ttl, Duration::from_secs(300));
        assert_eq!(cfg.ui.theme, "default");
    }

    #[test]
    fn env_overrides() {
        env::set_var("BUMAVIEW_TEST_ENV_UI__THEME", "dracula");
        env::set_var("BUMAVIEW_TEST_ENV_API__TOKEN", "tkn");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("BUMAVIEW_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "dracula");
        assert_eq!(cfg.api.token, "tkn");
        env::remove_var("BUMAVIEW_TEST_ENV_UI__THEME");
        env::remove_var("BUMAVIEW_TEST_ENV_API__TOKEN");
    }
}
