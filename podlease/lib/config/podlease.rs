//! Podlease configuration types and helpers.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    utils::{
        self, LEASE_DB_FILENAME, PODLEASE_CONFIG_FILENAME, PODLEASE_DATABASE_PATH_ENV_VAR,
        PODLEASE_DEFAULT_IMAGE_ENV_VAR, PODLEASE_SWEEP_INTERVAL_MS_ENV_VAR,
    },
    PodleaseError, PodleaseResult,
};

use super::{
    DEFAULT_COMMAND, DEFAULT_IMAGE, DEFAULT_PODLEASE_HOME, DEFAULT_STOP_TIMEOUT_SECS,
    DEFAULT_SWEEP_INTERVAL_MS,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The podlease configuration.
///
/// Read from `podlease.toml` in the podlease home, then overridden by `PODLEASE_*` environment
/// variables. Every field has a default, so an empty or missing file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PodleaseConfig {
    /// The directory holding the config file, the database and the logs.
    #[serde(skip, default = "PodleaseConfig::default_home_dir")]
    #[builder(default = PodleaseConfig::default_home_dir(), setter(into))]
    home_dir: PathBuf,

    /// The lease database path. Relative paths are resolved against `home_dir`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    database_path: Option<PathBuf>,

    /// Time between expiry sweeps, in milliseconds.
    #[serde(default = "PodleaseConfig::default_sweep_interval_ms")]
    #[builder(default = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval_ms: u64,

    /// The image new sandboxes run when the caller does not pick one.
    #[serde(default = "PodleaseConfig::default_image")]
    #[builder(default = DEFAULT_IMAGE.to_string(), setter(into))]
    default_image: String,

    /// The command new sandboxes run when the caller does not pick one.
    #[serde(default = "PodleaseConfig::default_command")]
    #[builder(default = DEFAULT_COMMAND.to_string(), setter(into))]
    default_command: String,

    /// Seconds a unit gets to exit after SIGTERM before it is killed.
    #[serde(default = "PodleaseConfig::default_stop_timeout_secs")]
    #[builder(default = DEFAULT_STOP_TIMEOUT_SECS)]
    stop_timeout_secs: i64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodleaseConfig {
    /// Loads the configuration for the current process.
    ///
    /// Resolves the home directory, parses `podlease.toml` from it if the file exists, then
    /// applies environment overrides. Call [`utils::load_dotenv`] first for `.env` values to
    /// take part.
    pub fn load() -> PodleaseResult<Self> {
        let home = utils::podlease_home();
        let config_path = home.join(PODLEASE_CONFIG_FILENAME);

        let config = if config_path.exists() {
            tracing::debug!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&home, &contents)?
        } else {
            Self::builder().home_dir(home).build()
        };

        config.with_env_overrides(utils::env_var)
    }

    /// Parses a configuration file whose home directory is `home`.
    pub fn from_toml_str(home: impl AsRef<Path>, contents: &str) -> PodleaseResult<Self> {
        let mut config: Self = toml::from_str(contents)?;
        config.home_dir = home.as_ref().to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps an environment variable name to its value.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PodleaseResult<Self> {
        if let Some(path) = lookup(PODLEASE_DATABASE_PATH_ENV_VAR) {
            self.database_path = Some(PathBuf::from(path));
        }

        if let Some(interval) = lookup(PODLEASE_SWEEP_INTERVAL_MS_ENV_VAR) {
            self.sweep_interval_ms = interval.trim().parse().map_err(|_| {
                PodleaseError::InvalidConfig(format!(
                    "{PODLEASE_SWEEP_INTERVAL_MS_ENV_VAR} must be a whole number of milliseconds, got {interval:?}"
                ))
            })?;
        }

        if let Some(image) = lookup(PODLEASE_DEFAULT_IMAGE_ENV_VAR) {
            self.default_image = image;
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks that the configuration can be used to run the service.
    pub fn validate(&self) -> PodleaseResult<()> {
        if self.sweep_interval_ms == 0 {
            return Err(PodleaseError::InvalidConfig(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.default_image.trim().is_empty() {
            return Err(PodleaseError::InvalidConfig(
                "default_image must not be empty".to_string(),
            ));
        }

        if self.stop_timeout_secs < 0 {
            return Err(PodleaseError::InvalidConfig(
                "stop_timeout_secs must not be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// The resolved lease database path.
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.home_dir.join(path),
            None => self.home_dir.join(LEASE_DB_FILENAME),
        }
    }

    /// The time between expiry sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// The default command split into arguments.
    pub fn default_argv(&self) -> Vec<String> {
        split_command(&self.default_command)
    }

    fn default_home_dir() -> PathBuf {
        DEFAULT_PODLEASE_HOME.clone()
    }

    fn default_sweep_interval_ms() -> u64 {
        DEFAULT_SWEEP_INTERVAL_MS
    }

    fn default_image() -> String {
        DEFAULT_IMAGE.to_string()
    }

    fn default_command() -> String {
        DEFAULT_COMMAND.to_string()
    }

    fn default_stop_timeout_secs() -> i64 {
        DEFAULT_STOP_TIMEOUT_SECS
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for PodleaseConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits a command line on whitespace.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
