//! Process-level configuration loaded from `config.toml`.
//!
//! Generation tuning lives in the database (`models::Settings`); this file
//! covers everything needed before the database is open: storage paths,
//! logging, provider toggles, and downstream-manager credentials.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    pub manager: Option<ManagerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where the generated XMLTV document is written
    pub xmltv_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub espn: ProviderConfig,
    pub sportsdb: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    /// Lower is preferred when several adapters support a league
    pub priority: u32,
    pub requests_per_minute: u32,
    /// API key where the provider wants one
    pub api_key: Option<String>,
}

/// Downstream IPTV manager connection. Channel lifecycle and event groups
/// are skipped entirely when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./teamarr.db".to_string(),
                max_connections: Some(10),
            },
            output: OutputConfig {
                xmltv_path: PathBuf::from("./data/epg.xml"),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Text,
                dir: None,
            },
            providers: ProvidersConfig {
                espn: ProviderConfig {
                    enabled: true,
                    priority: 10,
                    requests_per_minute: 30,
                    api_key: None,
                },
                sportsdb: ProviderConfig {
                    enabled: true,
                    priority: 50,
                    requests_per_minute: 20,
                    api_key: None,
                },
            },
            manager: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(&config_file)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, contents)?;
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.database.url, config.database.url);
        assert_eq!(parsed.providers.espn.priority, 10);
        assert!(parsed.manager.is_none());
    }

    #[test]
    fn load_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
        assert_eq!(config.logging.level, "info");

        // And the written defaults load back unchanged
        let reloaded = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded.providers.sportsdb.priority, 50);
    }
}
