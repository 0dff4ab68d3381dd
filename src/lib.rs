//! # VISA Test Harness
//!
//! Infrastructure for running the test suite of a VISA instrument binding
//! safely whether or not instrument software or hardware is attached. The
//! harness decides whether tests run and observes the logging side effects of
//! running them; it never talks to an instrument itself.
//!
//! ## Crate Structure
//!
//! - **`probe`**: Opens the default resource manager once per process and
//!   memoizes whether a VISA backend is present. "Library not found" becomes a
//!   skip; any other failure propagates.
//! - **`gate`**: Run/skip predicates with fixed reasons: `BackendGate` on top
//!   of the probe, `VirtualInstrumentGate` on the presence of an environment
//!   variable. Includes the `skip_unless!` macro.
//! - **`registry`**: Static category → address and address → alias tables of
//!   the buildbot's endpoints.
//! - **`logger`**: The binding's shared, named logger with an explicit
//!   subscribe/unsubscribe API and the `tracing_subscriber` layer feeding it.
//! - **`capture`**: `LogCaptureHandler`, a never-flushing per-test collector.
//! - **`warning_free`**: `WarningFreeTestCase` and the scoped `WarningCheck`
//!   that fails a test leaking warning-or-above records.
//! - **`parametrize`**: Independent copies of a test function and a builder
//!   expanding one body over every registered endpoint.
//! - **`suite`**: Runs registrations behind their gates inside warning checks.
//! - **`config`**: Figment-based configuration (`config/harness.toml` plus
//!   `VISA_HARNESS_*` environment overrides).
//! - **`tracing_init`**: Subscriber set-up combining console output with the
//!   shared logger's layer.
//! - **`error`**: `HarnessError` and `ProbeError`.

pub mod capture;
pub mod config;
pub mod error;
pub mod gate;
pub mod logger;
pub mod parametrize;
pub mod probe;
pub mod registry;
pub mod suite;
pub mod tracing_init;
pub mod warning_free;

pub use capture::{CaptureState, LogCaptureHandler};
pub use error::{HarnessError, HarnessResult, ProbeError};
pub use gate::{BackendGate, Gate, GateDecision, VirtualInstrumentGate};
pub use logger::{visa_logger, LogHandler, LogRecord, SharedLogger};
pub use parametrize::{ParametrizeBuilder, TestFunction, TestRegistration};
pub use probe::{is_backend_present, CapabilityFlag, CapabilityProbe, ResourceManagerBackend};
pub use registry::{ResourceAddressRegistry, ResourceCase};
pub use suite::{SuiteReport, TestOutcome, TestSuite};
pub use warning_free::{WarningCheck, WarningFreeTestCase, WarningLeak};
