//! "No warnings leaked" as a checked property of every test.
//!
//! Every test that does not opt out runs inside a [`WarningCheck`]: a capture
//! handler is attached to the shared logger at `WARN` before the body runs,
//! and after the body the buffer must be empty. A non-empty buffer fails the
//! test with a [`WarningLeak`] whose message lists the literal text of each
//! captured record, one per line.
//!
//! The handler is detached on every path, including when the body returns an
//! error or panics, so a stale handler never sees the next test's records.
//!
//! Set-up fails if the logger's layer is not part of the active subscriber;
//! see [`tracing_init::ensure_installed`](crate::tracing_init::ensure_installed).
//!
//! # Example
//! ```
//! use tracing_subscriber::layer::SubscriberExt;
//! use visa_harness::logger::SharedLogger;
//! use visa_harness::warning_free::WarningFreeTestCase;
//!
//! struct ReadTermination;
//!
//! impl WarningFreeTestCase for ReadTermination {}
//!
//! let logger = SharedLogger::new("visa");
//! let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(logger.layer()));
//!
//! let outcome = ReadTermination.run_case_on(&logger, || Ok(()));
//! assert!(outcome.is_ok());
//! ```

use std::fmt;

use tracing::{warn, Level};

use crate::capture::LogCaptureHandler;
use crate::error::{HarnessError, HarnessResult};
use crate::logger::{visa_logger, LogRecord, SharedLogger};
use crate::tracing_init;

/// Warning-or-above records captured during a test that did not opt out.
#[derive(Debug, Clone)]
pub struct WarningLeak {
    records: Vec<LogRecord>,
}

impl WarningLeak {
    /// Wraps the captured records. Returns `None` for an empty buffer.
    pub fn from_records(records: Vec<LogRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { records })
        }
    }

    /// Number of captured records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// The captured records in emission order.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// The literal message of every record, joined by newlines.
    pub fn messages(&self) -> String {
        self.records
            .iter()
            .map(|record| record.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for WarningLeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} warnings raised.\n{}", self.count(), self.messages())
    }
}

/// Scoped warning check around one test body.
///
/// Created by [`WarningCheck::set_up`]; consumed by
/// [`WarningCheck::tear_down`]. Dropping it without tearing down (e.g. while
/// unwinding from a panic) still detaches the handler.
#[derive(Debug)]
pub struct WarningCheck {
    handler: Option<LogCaptureHandler>,
}

impl WarningCheck {
    /// Attaches a `WARN` capture handler to `logger` if `check_no_warning`
    /// is set; otherwise the check is a no-op.
    ///
    /// Fails with [`HarnessError::LoggerNotInstalled`] when records of
    /// `logger` cannot reach the handler.
    pub fn set_up(logger: &SharedLogger, check_no_warning: bool) -> HarnessResult<Self> {
        if !check_no_warning {
            return Ok(Self { handler: None });
        }
        tracing_init::ensure_installed(logger)?;
        Ok(Self {
            handler: Some(LogCaptureHandler::attach(logger, Level::WARN, false)),
        })
    }

    /// `true` if a handler is attached.
    pub fn is_checking(&self) -> bool {
        self.handler.is_some()
    }

    /// Detaches the handler and returns what it captured, if anything.
    pub fn finish(mut self) -> Option<WarningLeak> {
        let mut handler = self.handler.take()?;
        handler.detach();
        WarningLeak::from_records(handler.buffer_snapshot())
    }

    /// Detaches the handler and fails if it captured anything.
    pub fn tear_down(self) -> HarnessResult<()> {
        match self.finish() {
            None => Ok(()),
            Some(leak) => Err(HarnessError::WarningsRaised(leak)),
        }
    }

    /// Like [`WarningCheck::tear_down`] but fails the calling test with a
    /// panic, for use directly inside `#[test]` functions.
    #[track_caller]
    #[allow(clippy::panic)]
    pub fn assert_no_warnings(self) {
        if let Err(err) = self.tear_down() {
            panic!("{err}");
        }
    }

    /// Runs `body` between set-up and tear-down.
    ///
    /// A failing body takes precedence over leaked warnings. The leak is
    /// carried in [`HarnessError::Test`] and logged.
    pub fn run<F>(logger: &SharedLogger, check_no_warning: bool, name: &str, body: F) -> HarnessResult<()>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let check = Self::set_up(logger, check_no_warning)?;
        let result = body();
        let leaked = check.finish();

        match (result, leaked) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some(leak)) => Err(HarnessError::WarningsRaised(leak)),
            (Err(source), leaked) => {
                if let Some(leak) = &leaked {
                    warn!(test = name, "{leak}");
                }
                Err(HarnessError::Test {
                    name: name.to_string(),
                    source,
                    leaked,
                })
            }
        }
    }
}

impl Drop for WarningCheck {
    fn drop(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.detach();
        }
    }
}

/// Test fixtures that must not leak warnings.
///
/// Implementors get warning checking for free; setting
/// `CHECK_NO_WARNING = false` is the only supported override and permits
/// tests that expect warnings.
pub trait WarningFreeTestCase {
    /// Whether warnings fail the test.
    const CHECK_NO_WARNING: bool = true;

    /// Attaches the capture handler to the binding's logger.
    fn set_up(&self) -> HarnessResult<WarningCheck> {
        WarningCheck::set_up(visa_logger(), Self::CHECK_NO_WARNING)
    }

    /// Runs `body` against the binding's logger.
    fn run_case<F>(&self, body: F) -> HarnessResult<()>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        self.run_case_on(visa_logger(), body)
    }

    /// Runs `body` against an explicit logger.
    fn run_case_on<F>(&self, logger: &SharedLogger, body: F) -> HarnessResult<()>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        WarningCheck::run(
            logger,
            Self::CHECK_NO_WARNING,
            std::any::type_name::<Self>(),
            body,
        )
    }
}
