//! Configuration loader with layered sources.

use crate::{AppConfig, CacheBackend};
use caseflow_core::CaseflowError;
use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Uncommitted local overrides
    /// 4. Environment variables with `CASEFLOW__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, CaseflowError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, CaseflowError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    ///
    /// The previous configuration stays in place if the new one fails to load.
    pub async fn reload(&self) -> Result<(), CaseflowError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str) -> Result<AppConfig, CaseflowError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var("CASEFLOW_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config layer from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CASEFLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_caseflow_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_caseflow_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    fn validate_config(config: &AppConfig) -> Result<(), CaseflowError> {
        config.cache.validate()?;

        if config.cache.enabled && config.cache.backend == CacheBackend::Redis {
            if config.redis.url.trim().is_empty() {
                return Err(CaseflowError::configuration(
                    "Redis URL is required when cache.backend = \"redis\"",
                ));
            }
            if config.redis.pool_size == 0 {
                return Err(CaseflowError::configuration("redis.pool_size must be at least 1"));
            }
        }

        if config.app.environment == "production" && config.cache.backend == CacheBackend::Memory {
            warn!("In-memory cache backend in production: entries are not shared between instances");
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_caseflow_error(err: ConfigError) -> CaseflowError {
    CaseflowError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_missing_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent").to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert!(config.cache.enabled);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
    }

    #[tokio::test]
    async fn test_default_toml_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[cache]\ndefault_ttl_secs = 120\nsingle_flight = true\n",
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.cache.default_ttl_secs, 120);
        assert!(config.cache.single_flight);

        let ttl: Option<u64> = loader.get_value("cache.default_ttl_secs").await;
        assert_eq!(ttl, Some(120));
    }

    #[tokio::test]
    async fn test_invalid_cache_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[cache]\ndefault_ttl_secs = 0\n").unwrap();

        let result = ConfigLoader::new(dir.path().to_string_lossy());
        assert!(matches!(result, Err(CaseflowError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, "[cache]\nsweep_interval_secs = 30\n").unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.get().await.cache.sweep_interval_secs, 30);

        fs::write(&path, "[cache]\nsweep_interval_secs = 0\n").unwrap();
        loader.reload().await.unwrap();
        assert!(loader.get().await.cache.sweep_interval().is_none());
    }
}
