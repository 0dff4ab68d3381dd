//! Process where no VISA library is installed.
//!
//! The capability is memoized per process, so this file holds a single
//! scenario: the probe is initialized with a backend whose library is
//! missing.

use std::path::PathBuf;

use visa_harness::gate::{BackendGate, Gate, GateDecision, REQUIRES_VISA_LIBRARY};
use visa_harness::probe::{self, SharedLibraryBackend};
use visa_harness::{skip_unless, HarnessError};

fn absent_backend() -> SharedLibraryBackend {
    let dir = tempfile::tempdir().unwrap();
    let missing: PathBuf = dir.path().join("libvisa.so");
    SharedLibraryBackend::default().with_candidates(vec![missing])
}

#[test]
fn absent_backend_skips_gated_tests() {
    let backend = absent_backend();
    // A host-level VISA_LIBRARY would turn this into a different scenario.
    if std::env::var_os(probe::VISA_LIBRARY_ENV).is_some() {
        eprintln!("[SKIP] VISA_LIBRARY is set on this host");
        return;
    }

    // Reading before start-up initialization is an error, never a silent probe.
    assert!(matches!(probe::global(), Err(HarnessError::ProbeNotInitialized)));
    assert!(BackendGate::new().decide().is_err());

    let flag = probe::initialize(&backend).expect("absence is not an error");
    assert!(!flag.is_present());
    assert!(flag.detail().is_some());

    assert!(!probe::is_backend_present().unwrap());
    assert_eq!(
        BackendGate::new().decide().unwrap(),
        GateDecision::Skip {
            reason: REQUIRES_VISA_LIBRARY
        }
    );

    // The memoized value wins over later initializations.
    let again = probe::initialize(&visa_harness::probe::StaticBackend::present()).unwrap();
    assert!(!again.is_present());

    fn gated_body() -> anyhow::Result<()> {
        skip_unless!(BackendGate::new());
        anyhow::bail!("must not run without a backend")
    }
    assert!(gated_body().is_ok());
}
