//! Reads [`CourierConfig`] from one file and the environment.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. field defaults
//! 2. one config file: the explicit [`ConfigLoader::file`], or else the first
//!    `courier.toml` / `courier.yaml` / `courier.yml` found on the search path
//! 3. `COURIER_*` variables, `__` separating nested keys
//!    (`COURIER_CONSUMER__CONCURRENCY=32`, `COURIER_BROKER__URL=amqp://...`)
//!
//! The search path is every [`ConfigLoader::search_path`] entry followed by the
//! working directory and `<config dir>/courier`.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::Env;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::CourierConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "COURIER_";

const FILE_NAMES: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "courier.toml",
    #[cfg(feature = "yaml-config")]
    "courier.yaml",
    #[cfg(feature = "yaml-config")]
    "courier.yml",
];

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            search_paths: Vec::new(),
            env: true,
        }
    }

    /// Loads exactly this file; it must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Looks in `dir` before the default directories.
    pub fn search_path<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.search_paths.push(dir.as_ref().to_path_buf());
        self
    }

    /// Ignores `COURIER_*` variables.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<CourierConfig> {
        let config: CourierConfig = self.figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            service = %config.service.name,
            queues = config.consumer.queues.len(),
            broker = config.broker.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::new();

        let file = match &self.file {
            Some(path) if path.exists() => Some(path.clone()),
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => self.discover(),
        };
        match file {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, &path)?;
            }
            None => debug!("No configuration file found, using defaults"),
        }

        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment)
    }

    fn discover(&self) -> Option<PathBuf> {
        let defaults = std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("courier")));

        self.search_paths
            .iter()
            .cloned()
            .chain(defaults)
            .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Loads configuration from the default search path and environment.
pub fn load_config() -> ConfigResult<CourierConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<CourierConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct ExchangeSettings {
        url: String,
        exchange: String,
        prefetch: u16,
    }

    #[test]
    fn test_defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new().without_env().load().map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, LogLevel::Info);
            assert_eq!(config.consumer.concurrency, 10);
            assert_eq!(config.retry.max_retries, 3);
            assert!(config.broker.is_none());
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_env_overrides_discovered_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "courier.toml",
                r#"
                [service]
                name = "billing"
                routing_key = "orders"

                [consumer]
                queues = ["billing"]
                concurrency = 4
                "#,
            )?;
            jail.set_env("COURIER_CONSUMER__CONCURRENCY", "16");
            jail.set_env("COURIER_LOGGING__LEVEL", "debug");

            let config = load_config().map_err(|e| e.to_string())?;
            assert_eq!(config.service.name, "billing");
            assert_eq!(config.service.routing_key.as_deref(), Some("orders"));
            assert_eq!(config.consumer.queues, ["billing"]);
            assert_eq!(config.consumer.concurrency, 16);
            assert_eq!(config.logging.level, LogLevel::Debug);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_search_path_wins_over_working_directory() {
        Jail::expect_with(|jail| {
            jail.create_file("courier.toml", "[retry]\nmax_retries = 1\n")?;
            std::fs::create_dir("deploy").map_err(|e| e.to_string())?;
            jail.create_file("deploy/courier.toml", "[retry]\nmax_retries = 7\n")?;

            let config = ConfigLoader::new()
                .search_path(jail.directory().join("deploy"))
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.retry.max_retries, 7);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_broker_table_reaches_adapter_settings() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "courier.toml",
                r#"
                [broker]
                url = "amqp://rabbit:5672/%2f"
                exchange = "orders"
                "#,
            )?;
            jail.set_env("COURIER_BROKER__EXCHANGE", "orders.v2");

            let config = load_config().map_err(|e| e.to_string())?;
            let settings: ExchangeSettings =
                config.broker_settings().map_err(|e| e.to_string())?;
            assert_eq!(settings.url, "amqp://rabbit:5672/%2f");
            assert_eq!(settings.exchange, "orders.v2");
            assert_eq!(settings.prefetch, 0);
            Ok(())
        });
    }

    #[test]
    fn test_absent_broker_table_gives_adapter_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new().without_env().load().map_err(|e| e.to_string())?;
            let settings: ExchangeSettings =
                config.broker_settings().map_err(|e| e.to_string())?;
            assert!(settings.exchange.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_env_value_fails_validation() {
        Jail::expect_with(|jail| {
            jail.set_env("COURIER_CONSUMER__CONCURRENCY", "0");
            let err = load_config().unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_config_from_file("/nonexistent/courier.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("courier.json", "{}")?;
            let err = ConfigLoader::new().file("courier.json").load().unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "json"));
            Ok(())
        });
    }
}
