//! # Configuration Loading
//!
//! Layers defaults, an optional `krelay.toml` and `KRELAY_*` environment
//! variables, then validates the result.

use crate::{config::schema::ManagementConfig, Error, Result};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use validator::Validate;

const CONFIG_NAMES: [&str; 2] = ["krelay.toml", "kafka.toml"];

/// Configuration loader with support for files and environment variables
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from("."), PathBuf::from("./config")],
            env_prefix: "KRELAY".to_string(),
            env: None,
        }
    }

    /// Add a search path for configuration files
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Set the environment variable prefix
    pub fn with_env_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.as_ref().to_string();
        self
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Load configuration from all available sources
    pub fn load(&self) -> Result<ManagementConfig> {
        let mut config_value = toml::Value::try_from(ManagementConfig::default()).map_err(|e| {
            Error::Configuration {
                message: format!("Failed to serialize default config: {e}"),
            }
        })?;

        if let Some(config_path) = self.find_config_file() {
            let file_config = Self::load_config_file(&config_path)?;
            Self::merge_config(&mut config_value, file_config);
            info!("Loaded configuration file: {}", config_path.display());
        } else {
            debug!("No configuration file found in search paths");
        }

        self.apply_env_vars(&mut config_value)?;

        let config: ManagementConfig = config_value.try_into()?;
        config.validate()?;

        info!(brokers = ?config.brokers, prefix = %config.topic_prefix, "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<ManagementConfig> {
        let path = path.as_ref();
        info!("Loading configuration from file: {}", path.display());

        let config: ManagementConfig = Self::load_config_file(path)?.try_into()?;
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.exists())
    }

    fn load_config_file(path: &Path) -> Result<toml::Value> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Configuration {
            message: format!("Failed to read config file {}: {e}", path.display()),
        })?;

        content.parse::<toml::Value>().map_err(|e| Error::Configuration {
            message: format!("Failed to parse config file {}: {e}", path.display()),
        })
    }

    fn merge_config(base: &mut toml::Value, override_value: toml::Value) {
        if let (toml::Value::Table(base_table), toml::Value::Table(override_table)) =
            (base, override_value)
        {
            for (key, value) in override_table {
                base_table.insert(key, value);
            }
        }
    }

    fn env_var(&self, key: &str) -> Option<String> {
        let name = format!("{}_{key}", self.env_prefix);
        match &self.env {
            Some(vars) => vars.get(&name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn apply_env_vars(&self, config: &mut toml::Value) -> Result<()> {
        let toml::Value::Table(table) = config else {
            return Ok(());
        };

        if let Some(brokers) = self.env_var("BROKERS") {
            let list = brokers
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| toml::Value::String(b.to_string()))
                .collect();
            table.insert("brokers".to_string(), toml::Value::Array(list));
        }
        for (var, key) in [("TOPIC_PREFIX", "topic_prefix"), ("SERVICE_NAME", "service_name")] {
            if let Some(value) = self.env_var(var) {
                table.insert(key.to_string(), toml::Value::String(value));
            }
        }
        if let Some(value) = self.env_var("IS_LOCAL") {
            let is_local = parse_bool(&value).ok_or_else(|| Error::Configuration {
                message: format!("{}_IS_LOCAL: not a boolean: {value}", self.env_prefix),
            })?;
            table.insert("is_local".to_string(), toml::Value::Boolean(is_local));
        }
        if let Some(value) = self.env_var("DIAL_TIMEOUT_MS") {
            match value.parse::<i64>() {
                Ok(ms) if ms >= 0 => {
                    table.insert("dial_timeout".to_string(), toml::Value::Integer(ms));
                },
                _ => warn!("Ignoring invalid {}_DIAL_TIMEOUT_MS: {value}", self.env_prefix),
            }
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn isolated() -> ConfigLoader {
        ConfigLoader {
            search_paths: Vec::new(),
            env_prefix: "KRELAY".to_string(),
            env: Some(HashMap::new()),
        }
    }

    #[test]
    fn test_load_without_brokers_fails() {
        let result = isolated().load();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let config = isolated()
            .with_env([
                ("KRELAY_BROKERS", "b1:9092, b2:9092"),
                ("KRELAY_TOPIC_PREFIX", "stag.osaka."),
                ("KRELAY_SERVICE_NAME", "billing"),
                ("KRELAY_IS_LOCAL", "true"),
                ("KRELAY_DIAL_TIMEOUT_MS", "2500"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(config.topic_prefix, "stag.osaka.");
        assert_eq!(config.service_name, "billing");
        assert!(config.is_local);
        assert_eq!(config.dial_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_file_then_env() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("krelay.toml"),
            "brokers = [\"file:9092\"]\ntopic_prefix = \"prod.\"\nservice_name = \"svc\"\n",
        )
        .unwrap();

        let config = isolated()
            .with_path(temp_dir.path())
            .with_env([("KRELAY_TOPIC_PREFIX", "dev.")])
            .load()
            .unwrap();

        assert_eq!(config.brokers, vec!["file:9092"]);
        assert_eq!(config.topic_prefix, "dev.");
        assert_eq!(config.service_name, "svc");
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        std::fs::write(&path, "brokers = [\"a:9092\"]\nis_local = true\ndial_timeout = 500\n")
            .unwrap();

        let config = isolated().load_from_file(&path).unwrap();
        assert!(config.is_local);
        assert_eq!(config.dial_timeout, Duration::from_millis(500));

        std::fs::write(&path, "brokers = []\n").unwrap();
        assert!(isolated().load_from_file(&path).is_err());
    }

    #[test]
    fn test_invalid_bool() {
        let result = isolated()
            .with_env([("KRELAY_BROKERS", "a:9092"), ("KRELAY_IS_LOCAL", "maybe")])
            .load();
        assert!(result.is_err());
    }
}
