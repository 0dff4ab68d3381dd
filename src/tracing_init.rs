//! Process subscriber for harness runs.
//!
//! The subscriber carries two layers:
//! - console output (compact or JSON) behind an `EnvFilter`,
//! - the shared logger's [`LoggerLayer`](crate::logger::LoggerLayer), left
//!   unfiltered so capture handlers see warnings even when console output is
//!   turned down to `error`.
//!
//! [`ensure_installed`] is what [`WarningCheck`](crate::warning_free::WarningCheck)
//! calls before every checked test: a logger whose layer is not reachable
//! from the active subscriber would make every warning check pass vacuously.
//!
//! # Example
//! ```no_run
//! use visa_harness::{config::HarnessConfig, logger::visa_logger, tracing_init};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::load()?;
//! tracing_init::install_from_config(&config, visa_logger())?;
//!
//! tracing::warn!(target: "visa", "termination character not set");
//! # Ok(())
//! # }
//! ```

use tracing::subscriber::NoSubscriber;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::config::{HarnessConfig, LogFormat};
use crate::error::{HarnessError, HarnessResult};
use crate::logger::SharedLogger;

/// Console settings of the process subscriber.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Console verbosity when `RUST_LOG` is not set.
    pub level: Level,
    /// Console output format.
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
        }
    }
}

impl TracingConfig {
    /// Console settings from the `[application]` section.
    pub fn from_harness_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let level = config.application.log_level.parse::<Level>().map_err(|_| {
            HarnessError::Configuration(format!(
                "Invalid log level '{}'",
                config.application.log_level
            ))
        })?;

        Ok(Self {
            level,
            format: config.application.log_format,
        })
    }

    /// Console settings at `level`, compact output.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

/// Installs the global subscriber configured by the harness configuration.
pub fn install_from_config(config: &HarnessConfig, logger: &SharedLogger) -> HarnessResult<()> {
    install(&TracingConfig::from_harness_config(config)?, logger)
}

/// Installs the console layer plus `logger`'s layer as the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn install(config: &TracingConfig, logger: &SharedLogger) -> HarnessResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

    let console: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_test_writer()
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_test_writer().boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(console.with_filter(filter))
        .with(logger.layer());

    tracing::subscriber::set_global_default(subscriber).map_err(|err| {
        HarnessError::Configuration(format!("Failed to install tracing subscriber: {err}"))
    })?;
    debug!(logger = logger.name(), "tracing subscriber installed");
    Ok(())
}

/// Makes sure records of `logger` reach its handlers on this thread.
///
/// When no subscriber is active at all, a global one is installed from the
/// harness configuration. Fails with [`HarnessError::LoggerNotInstalled`] when the
/// active subscriber was set up elsewhere without the logger's layer.
pub fn ensure_installed(logger: &SharedLogger) -> HarnessResult<()> {
    if logger.is_installed() {
        return Ok(());
    }

    if !tracing::dispatcher::has_been_set() && no_active_subscriber() {
        let config = TracingConfig::from_harness_config(&HarnessConfig::load_or_default())
            .unwrap_or_default();
        // Another thread may win the race; the check below decides.
        if let Err(err) = install(&config, logger) {
            debug!(error = %err, "global subscriber installed concurrently");
        }
    }

    if logger.is_installed() {
        Ok(())
    } else {
        Err(HarnessError::LoggerNotInstalled {
            logger: logger.name().to_string(),
        })
    }
}

/// `true` when neither a global nor a scoped subscriber is active.
fn no_active_subscriber() -> bool {
    tracing::dispatcher::get_default(|dispatch| dispatch.is::<NoSubscriber>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_from_harness_config() {
        let mut config = HarnessConfig::default();
        config.application.log_level = "DEBUG".to_string();
        config.application.log_format = LogFormat::Json;

        let tracing_config = TracingConfig::from_harness_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_level_is_a_configuration_error() {
        let mut config = HarnessConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(
            TracingConfig::from_harness_config(&config),
            Err(HarnessError::Configuration(_))
        ));
    }

    #[test]
    fn test_scoped_subscriber_counts_as_installed() {
        let logger = SharedLogger::new("visa");
        let subscriber = tracing_subscriber::registry().with(logger.layer());
        tracing::subscriber::with_default(subscriber, || {
            assert!(ensure_installed(&logger).is_ok());
        });
    }

    #[test]
    fn test_scoped_subscriber_without_layer_is_rejected() {
        let logger = SharedLogger::new("visa");
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            assert!(matches!(
                ensure_installed(&logger),
                Err(HarnessError::LoggerNotInstalled { .. })
            ));
        });
    }
}
