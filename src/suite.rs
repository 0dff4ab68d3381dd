//! Running a set of registrations with gates and warning checks.
//!
//! Discovery and reporting belong to the process's test runner; a
//! [`TestSuite`] only decides, for each registration, whether it runs, and
//! runs it inside a [`WarningCheck`]. Gates are evaluated once per suite run.
//! A panic in one body is caught so the remaining tests still run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, info, info_span, warn};

use crate::error::HarnessError;
use crate::gate::{Gate, GateDecision};
use crate::logger::{visa_logger, SharedLogger};
use crate::parametrize::TestRegistration;
use crate::warning_free::WarningCheck;

/// Result of one registration.
#[derive(Debug)]
pub enum TestOutcome {
    /// Body succeeded and no warnings leaked.
    Passed,
    /// Body failed, panicked, leaked warnings or a gate was broken.
    Failed(HarnessError),
    /// A gate was closed.
    Skipped(&'static str),
}

impl TestOutcome {
    /// `true` for [`TestOutcome::Passed`].
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    /// `true` for [`TestOutcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    /// `true` for [`TestOutcome::Skipped`].
    pub fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped(_))
    }
}

/// Outcome of every registration, in run order.
#[derive(Debug, Default)]
pub struct SuiteReport {
    results: Vec<(String, TestOutcome)>,
}

impl SuiteReport {
    /// Per-test outcomes.
    pub fn results(&self) -> &[(String, TestOutcome)] {
        &self.results
    }

    /// Outcome of the test with this name.
    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.results
            .iter()
            .find(|(test, _)| test == name)
            .map(|(_, outcome)| outcome)
    }

    /// Number of passed tests.
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_passed()).count()
    }

    /// Number of failed tests.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_failed()).count()
    }

    /// Number of skipped tests.
    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_skipped()).count()
    }

    /// `true` if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

struct Entry {
    registration: TestRegistration,
    gates: Vec<usize>,
}

/// A gate's decision for this run, with its reason kept for failures.
type Evaluated = (&'static str, Result<GateDecision, Arc<HarnessError>>);

/// Registrations plus the gates each one requires.
pub struct TestSuite {
    logger: SharedLogger,
    gates: Vec<Box<dyn Gate>>,
    entries: Vec<Entry>,
}

impl Default for TestSuite {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSuite {
    /// Suite checking warnings on the binding's logger.
    pub fn new() -> Self {
        Self::with_logger(visa_logger().clone())
    }

    /// Suite checking warnings on an explicit logger.
    pub fn with_logger(logger: SharedLogger) -> Self {
        Self {
            logger,
            gates: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Adds an ungated test.
    pub fn add(&mut self, registration: TestRegistration) -> &mut Self {
        self.entries.push(Entry {
            registration,
            gates: Vec::new(),
        });
        self
    }

    /// Adds tests that all require `gates`.
    pub fn add_gated<I>(&mut self, registrations: I, gates: Vec<Box<dyn Gate>>) -> &mut Self
    where
        I: IntoIterator<Item = TestRegistration>,
    {
        let first = self.gates.len();
        self.gates.extend(gates);
        let indices: Vec<usize> = (first..self.gates.len()).collect();
        for registration in registrations {
            self.entries.push(Entry {
                registration,
                gates: indices.clone(),
            });
        }
        self
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no test is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every registration sequentially.
    pub fn run(&self) -> SuiteReport {
        let decisions: Vec<Evaluated> = self
            .gates
            .iter()
            .map(|gate| (gate.reason(), gate.decide().map_err(Arc::new)))
            .collect();

        let mut report = SuiteReport::default();
        for entry in &self.entries {
            let name = entry.registration.name().to_string();
            let outcome = self.run_entry(entry, &decisions);
            match &outcome {
                TestOutcome::Passed => info!(test = %name, "passed"),
                TestOutcome::Skipped(reason) => info!(test = %name, %reason, "skipped"),
                TestOutcome::Failed(err) => error!(test = %name, error = %err, "failed"),
            }
            report.results.push((name, outcome));
        }

        info!(
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "suite finished"
        );
        report
    }

    fn run_entry(&self, entry: &Entry, decisions: &[Evaluated]) -> TestOutcome {
        for &index in &entry.gates {
            match &decisions[index] {
                (_, Ok(GateDecision::Run)) => {}
                (_, Ok(GateDecision::Skip { reason })) => return TestOutcome::Skipped(*reason),
                (reason, Err(source)) => {
                    return TestOutcome::Failed(HarnessError::GateFailed {
                        reason: *reason,
                        source: Arc::clone(source),
                    })
                }
            }
        }

        let registration = &entry.registration;
        let name = registration.name();
        let _span = info_span!("test", name).entered();
        let check = match WarningCheck::set_up(&self.logger, registration.check_no_warning()) {
            Ok(check) => check,
            Err(err) => return TestOutcome::Failed(err),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| registration.run()));

        // Detach before interpreting the body so the handler is released
        // on every path.
        let leaked = check.finish();
        if !matches!(result, Ok(Ok(()))) {
            if let Some(leak) = &leaked {
                warn!(test = name, "{leak}");
            }
        }

        match (result, leaked) {
            (Ok(Ok(())), None) => TestOutcome::Passed,
            (Ok(Ok(())), Some(leak)) => TestOutcome::Failed(HarnessError::WarningsRaised(leak)),
            (Ok(Err(source)), leaked) => TestOutcome::Failed(HarnessError::Test {
                name: name.to_string(),
                source,
                leaked,
            }),
            (Err(payload), leaked) => TestOutcome::Failed(HarnessError::Panicked {
                name: name.to_string(),
                message: panic_message(payload.as_ref()),
                leaked,
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::gate::{BackendGate, REQUIRES_VISA_LIBRARY};
    use crate::logger::LogRecord;
    use crate::parametrize::{ParametrizeBuilder, TestFunction};
    use crate::probe::{CapabilityProbe, StaticBackend};
    use crate::registry::ResourceAddressRegistry;
    use tracing::subscriber::DefaultGuard;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    fn installed(logger: &SharedLogger) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(logger.layer()))
    }

    fn backend_gate(present: bool) -> Box<dyn Gate> {
        let backend = if present {
            StaticBackend::present()
        } else {
            StaticBackend::failing(ProbeError::LibraryNotFound("absent".into()))
        };
        Box::new(BackendGate::with_flag(
            CapabilityProbe::run(&backend).unwrap(),
        ))
    }

    struct BrokenGate;

    impl Gate for BrokenGate {
        fn reason(&self) -> &'static str {
            "unused"
        }

        fn is_open(&self) -> crate::error::HarnessResult<bool> {
            Err(ProbeError::Configuration("VISA library path is a directory".into()).into())
        }
    }

    #[test]
    fn test_outcomes_are_reported_per_registration() {
        let logger = SharedLogger::new("visa");
        let _guard = installed(&logger);
        let warn_logger = logger.clone();

        let mut suite = TestSuite::with_logger(logger);
        suite
            .add(TestRegistration::plain(TestFunction::new("clean", |_| Ok(()))))
            .add(TestRegistration::plain(TestFunction::new("fails", |_| {
                anyhow::bail!("no response")
            })))
            .add(TestRegistration::plain(TestFunction::new("warns", move |_| {
                warn_logger.dispatch(&LogRecord::new(Level::WARN, "visa", "chunk size too small"));
                Ok(())
            })))
            .add(TestRegistration::plain(TestFunction::new("panics", |_| {
                panic!("boom")
            })));

        let report = suite.run();
        assert_eq!(report.results().len(), 4);
        assert!(report.outcome("clean").unwrap().is_passed());
        assert!(matches!(
            report.outcome("fails"),
            Some(TestOutcome::Failed(HarnessError::Test { .. }))
        ));
        match report.outcome("warns") {
            Some(TestOutcome::Failed(err)) => {
                assert_eq!(err.to_string(), "1 warnings raised.\nchunk size too small");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match report.outcome("panics") {
            Some(TestOutcome::Failed(HarnessError::Panicked { message, .. })) => {
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 3);
        assert!(!report.is_success());
    }

    #[test]
    fn test_closed_gate_skips_parametrized_tests() {
        let tests = ParametrizeBuilder::new(TestFunction::new("idn", |_| {
            anyhow::bail!("must not run")
        }))
        .over(ResourceAddressRegistry::builtin())
        .build();

        let mut suite = TestSuite::with_logger(SharedLogger::new("visa"));
        suite.add_gated(tests, vec![backend_gate(false)]);

        let report = suite.run();
        assert_eq!(report.skipped(), 2);
        assert!(report.is_success());
        assert!(matches!(
            report.outcome("idn[tcpip]"),
            Some(TestOutcome::Skipped(reason)) if *reason == REQUIRES_VISA_LIBRARY
        ));
    }

    #[test]
    fn test_open_gate_runs_tests() {
        let tests = ParametrizeBuilder::new(TestFunction::new("idn", |args| {
            anyhow::ensure!(args.contains_key("address"));
            Ok(())
        }))
        .over(ResourceAddressRegistry::builtin())
        .build();

        let logger = SharedLogger::new("visa");
        let _guard = installed(&logger);
        let mut suite = TestSuite::with_logger(logger);
        suite.add_gated(tests, vec![backend_gate(true)]);

        let report = suite.run();
        assert_eq!(report.passed(), 2);
    }

    #[test]
    fn test_broken_gate_fails_instead_of_skipping() {
        let mut suite = TestSuite::with_logger(SharedLogger::new("visa"));
        suite.add_gated(
            [TestRegistration::plain(TestFunction::new("open", |_| Ok(())))],
            vec![Box::new(BrokenGate) as Box<dyn Gate>],
        );

        let report = suite.run();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 0);
        match report.outcome("open") {
            Some(TestOutcome::Failed(HarnessError::GateFailed { reason, source })) => {
                assert_eq!(*reason, "unused");
                assert!(matches!(
                    source.as_ref(),
                    HarnessError::Probe(ProbeError::Configuration(message))
                        if message == "VISA library path is a directory"
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_failing_body_keeps_leaked_warning_text() {
        let logger = SharedLogger::new("visa");
        let _guard = installed(&logger);
        let emitter = logger.clone();
        let panicking = logger.clone();

        let mut suite = TestSuite::with_logger(logger);
        suite
            .add(TestRegistration::plain(TestFunction::new("read_raw", move |_| {
                emitter.dispatch(&LogRecord::new(Level::WARN, "visa", "read_termination ignored"));
                anyhow::bail!("timeout")
            })))
            .add(TestRegistration::plain(TestFunction::new("write_raw", move |_| {
                panicking.dispatch(&LogRecord::new(Level::WARN, "visa", "write_termination ignored"));
                panic!("boom")
            })));

        let report = suite.run();
        match report.outcome("read_raw") {
            Some(TestOutcome::Failed(err @ HarnessError::Test { .. })) => {
                let text = err.to_string();
                assert!(text.contains("timeout"), "{text}");
                assert!(text.contains("1 warnings raised.\nread_termination ignored"), "{text}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match report.outcome("write_raw") {
            Some(TestOutcome::Failed(err)) => {
                assert_eq!(
                    err.as_warning_leak().map(|leak| leak.messages()).as_deref(),
                    Some("write_termination ignored")
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_uninstalled_logger_fails_checked_tests() {
        let logger = SharedLogger::new("visa");
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());

        let mut suite = TestSuite::with_logger(logger);
        suite.add(TestRegistration::plain(TestFunction::new("idn", |_| Ok(()))));

        assert!(matches!(
            suite.run().outcome("idn"),
            Some(TestOutcome::Failed(HarnessError::LoggerNotInstalled { .. }))
        ));
    }

    #[test]
    fn test_allowed_warnings_do_not_fail() {
        let logger = SharedLogger::new("visa");
        let _guard = installed(&logger);
        let emitter = logger.clone();
        let mut suite = TestSuite::with_logger(logger.clone());
        suite.add(
            TestRegistration::plain(TestFunction::new("expected_warning", move |_| {
                emitter.dispatch(&LogRecord::new(Level::WARN, "visa", "deprecated keyword"));
                Ok(())
            }))
            .allow_warnings(),
        );

        assert!(suite.run().is_success());
        assert_eq!(logger.handler_count(), 0);
    }
}
