//! Harness configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/harness.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `VISA_HARNESS_`
//!
//! Every field has a default, so the harness runs without any file at all.
//!
//! # Example
//! ```no_run
//! use visa_harness::config::HarnessConfig;
//!
//! let config = HarnessConfig::load()?;
//! println!("Logger: {}", config.logger.name);
//! # Ok::<(), figment::Error>(())
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::gate::VIRTUAL_INSTRUMENT_ENV;
use crate::logger::LOGGER_NAME;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/harness.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "VISA_HARNESS_";

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Shared logger settings
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Capability probe settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Virtual instrument tier settings
    #[serde(default)]
    pub virtual_instrument: VirtualInstrumentConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Console output format of the harness process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// One JSON object per event, for buildbot log collection
    Json,
}

/// Shared logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Target prefix owned by the binding's logger
    #[serde(default = "default_logger_name")]
    pub name: String,
}

/// Which resource manager backend the capability probe opens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Locate the VISA shared library on disk
    #[default]
    SharedLibrary,
    /// Open a resource manager through visa-rs (feature `instrument_visa`)
    VisaRs,
}

/// Capability probe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend used by the probe
    #[serde(default)]
    pub kind: BackendKind,
    /// Explicit VISA library path; overrides the default search
    #[serde(default)]
    pub library_path: Option<PathBuf>,
}

/// Virtual instrument tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualInstrumentConfig {
    /// Environment variable whose presence enables the tier
    #[serde(default = "default_virtual_instrument_env")]
    pub env_var: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_logger_name() -> String {
    LOGGER_NAME.to_string()
}

fn default_virtual_instrument_env() -> String {
    VIRTUAL_INSTRUMENT_ENV.to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: default_logger_name(),
        }
    }
}

impl Default for VirtualInstrumentConfig {
    fn default() -> Self {
        Self {
            env_var: default_virtual_instrument_env(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from `config/harness.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `VISA_HARNESS_`,
    /// sections separated by a double underscore.
    /// Example: `VISA_HARNESS_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// Load configuration, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|err| {
            debug!(error = %err, "using default harness configuration");
            Self::default()
        })
    }

    /// Load and validate in one step
    pub fn load_validated<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let config = Self::load_from(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the effective configuration as TOML, e.g. to pin the settings
    /// of a buildbot run next to its logs
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> HarnessResult<()> {
        let path = path.as_ref();
        let toml_str = toml::to_string_pretty(self).map_err(|e| {
            HarnessError::Configuration(format!("Failed to serialize configuration: {e}"))
        })?;
        std::fs::write(path, toml_str).map_err(|e| {
            HarnessError::Configuration(format!(
                "Failed to write configuration to {}: {e}",
                path.display()
            ))
        })?;
        debug!(path = %path.display(), "harness configuration saved");
        Ok(())
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> HarnessResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(HarnessError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.logger.name.trim().is_empty() {
            return Err(HarnessError::Configuration(
                "logger.name must not be empty".into(),
            ));
        }

        if self.virtual_instrument.env_var.trim().is_empty() {
            return Err(HarnessError::Configuration(
                "virtual_instrument.env_var must not be empty".into(),
            ));
        }

        if let Some(path) = &self.backend.library_path {
            if path.as_os_str().is_empty() {
                return Err(HarnessError::Configuration(
                    "backend.library_path must not be empty when set".into(),
                ));
            }
        }

        Ok(())
    }
}
