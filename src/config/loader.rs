//! Layered settings: `lifecycle.yaml`, then `lifecycle.<env>.yaml` when
//! present, then `LIFECYCLE__SECTION__KEY` variables.

use super::error::{ConfigResult, ConfigurationError};
use super::LifecycleConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE: &str = "lifecycle.yaml";
const ENV_PREFIX: &str = "LIFECYCLE";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    config: LifecycleConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Environment from `LIFECYCLE_ENV` (or `APP_ENV`), directory from
    /// `LIFECYCLE_CONFIG_DIR`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Explicit environment, leaving process env detection out of it
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment,
            directory = %config_directory.display(),
            "Reading lifecycle configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            max_concurrent_tasks = config.worker.max_concurrent_tasks,
            polling_interval_ms = config.polling.default_interval_ms,
            "⚙️ CONFIG: lifecycle settings ready"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<LifecycleConfig> {
        let base_path = config_directory.join(BASE_FILE);
        if !base_path.is_file() {
            return Err(ConfigurationError::config_file_not_found(vec![base_path]));
        }
        let env_path = config_directory.join(format!("lifecycle.{environment}.yaml"));
        if env_path.is_file() {
            debug!(file = %env_path.display(), "Layering environment override");
        }

        Config::builder()
            .add_source(File::from(base_path).format(FileFormat::Yaml))
            .add_source(
                File::from(env_path)
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize::<LifecycleConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    fn detect_environment() -> String {
        env::var("LIFECYCLE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("LIFECYCLE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
