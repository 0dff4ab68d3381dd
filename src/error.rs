//! Custom error types for the harness.
//!
//! Two enums cover everything the harness can report:
//!
//! - **`ProbeError`**: raised by a [`ResourceManagerBackend`](crate::probe::ResourceManagerBackend)
//!   while trying to open the default resource manager. Only
//!   `ProbeError::LibraryNotFound` means "no VISA installed" and is turned into a
//!   skip; every other variant is a misconfiguration and propagates.
//! - **`HarnessError`**: the crate-wide error. It wraps probe errors, registry
//!   integrity violations, configuration loading failures and the two ways a
//!   test can fail: its body returned an error (or panicked), or it leaked
//!   warnings into the shared logger.
//!
//! `WarningsRaised` is the harness's primary correctness signal. Its `Display`
//! output carries the verbatim text of every captured record so that a failing
//! test's output alone is enough to diagnose it.

use std::sync::Arc;

use thiserror::Error;

use crate::warning_free::WarningLeak;

/// Convenience alias for results using the harness error type.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Failure while opening the backend resource manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// No VISA implementation could be located. Expected on machines without
    /// instrument software and converted into a skip.
    #[error("Could not locate a VISA implementation: {0}")]
    LibraryNotFound(String),

    /// The backend exists but is configured in a way that cannot work.
    #[error("VISA backend misconfigured: {0}")]
    Configuration(String),

    /// Filesystem access failed while inspecting the backend.
    #[error("I/O error while probing VISA backend: {0}")]
    Io(String),

    /// The backend itself reported an error status.
    #[error("VISA backend error: {0}")]
    Backend(String),
}

impl ProbeError {
    /// Returns `true` for the "hardware software absent" kind.
    pub fn is_library_not_found(&self) -> bool {
        matches!(self, ProbeError::LibraryNotFound(_))
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The capability probe failed for a reason other than absence.
    #[error("Capability probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// A gate was read before the capability probe ran at start-up.
    #[error("Capability probe not initialized; call probe::initialize at start-up")]
    ProbeNotInitialized,

    /// A gate could not be evaluated; every test behind it fails with this.
    #[error("Gate '{reason}' could not be evaluated: {source}")]
    GateFailed {
        /// Skip reason of the gate that failed.
        reason: &'static str,
        /// Error reported by the gate, shared by all tests behind it.
        #[source]
        source: Arc<HarnessError>,
    },

    /// The shared logger's layer is not part of the active subscriber, so
    /// its records would never reach a capture handler.
    #[error("Logger '{logger}' is not installed in the active tracing subscriber")]
    LoggerNotInstalled {
        /// Name of the logger.
        logger: String,
    },

    /// The resource table is inconsistent.
    #[error("Resource registry error: {0}")]
    Registry(String),

    /// Loading the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration loaded but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A test leaked warning-or-above records into the shared logger.
    #[error("{0}")]
    WarningsRaised(WarningLeak),

    /// A test body returned an error.
    #[error("Test '{name}' failed: {source:#}{}", leak_suffix(.leaked))]
    Test {
        /// Display name of the test.
        name: String,
        /// Error returned by the body.
        #[source]
        source: anyhow::Error,
        /// Warnings the body leaked before failing.
        leaked: Option<WarningLeak>,
    },

    /// A test body panicked.
    #[error("Test '{name}' panicked: {message}{}", leak_suffix(.leaked))]
    Panicked {
        /// Display name of the test.
        name: String,
        /// Panic payload, when it was a string.
        message: String,
        /// Warnings the body leaked before panicking.
        leaked: Option<WarningLeak>,
    },
}

fn leak_suffix(leaked: &Option<WarningLeak>) -> String {
    leaked
        .as_ref()
        .map(|leak| format!("\n{leak}"))
        .unwrap_or_default()
}

impl From<figment::Error> for HarnessError {
    fn from(value: figment::Error) -> Self {
        HarnessError::Config(Box::new(value))
    }
}

impl HarnessError {
    /// Returns the captured warnings: the leak itself, or the warnings a
    /// failed or panicked test emitted before failing.
    pub fn as_warning_leak(&self) -> Option<&WarningLeak> {
        match self {
            HarnessError::WarningsRaised(leak) => Some(leak),
            HarnessError::Test { leaked, .. } | HarnessError::Panicked { leaked, .. } => {
                leaked.as_ref()
            }
            _ => None,
        }
    }
}
