//! Process whose VISA configuration is broken.
//!
//! A probe failure other than "library not found" must never turn into a
//! skip: it is memoized as an error and every gated test reports it.

use visa_harness::error::{HarnessError, ProbeError};
use visa_harness::gate::{BackendGate, Gate, REQUIRES_VISA_LIBRARY};
use visa_harness::parametrize::{ParametrizeBuilder, TestFunction};
use visa_harness::probe::{self, StaticBackend};
use visa_harness::registry::ResourceAddressRegistry;
use visa_harness::suite::{TestOutcome, TestSuite};
use visa_harness::logger::SharedLogger;

#[test]
fn configuration_error_propagates_to_every_gated_test() {
    let broken = StaticBackend::failing(ProbeError::Configuration(
        "VISA library path '/opt/visa' is not a file".into(),
    ));

    let err = probe::initialize(&broken).unwrap_err();
    assert!(matches!(err, HarnessError::Probe(ProbeError::Configuration(_))));

    // Memoized: the same error on every read, no re-probe.
    assert!(probe::is_backend_present().is_err());
    assert!(probe::initialize(&StaticBackend::present()).is_err());
    assert!(BackendGate::new().decide().is_err());

    let tests = ParametrizeBuilder::new(TestFunction::new("query_idn", |_| Ok(())))
        .over(ResourceAddressRegistry::builtin())
        .build();
    let mut suite = TestSuite::with_logger(SharedLogger::new("visa"));
    suite.add_gated(tests, vec![Box::new(BackendGate::new()) as Box<dyn Gate>]);

    let report = suite.run();
    assert_eq!(report.failed(), 2);
    assert_eq!(report.skipped(), 0);
    for (_, outcome) in report.results() {
        match outcome {
            TestOutcome::Failed(HarnessError::GateFailed { reason, source }) => {
                assert_eq!(*reason, REQUIRES_VISA_LIBRARY);
                assert!(matches!(
                    source.as_ref(),
                    HarnessError::Probe(ProbeError::Configuration(message)) if message.contains("/opt/visa")
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
