//! Skip gates evaluated before a test runs.
//!
//! A gate is a predicate plus a fixed skip reason. Two gates exist:
//!
//! - [`BackendGate`]: is any VISA backend usable at all (memoized probe).
//! - [`VirtualInstrumentGate`]: has the operator opted in to the tier that
//!   talks to the Keysight virtual instrument on the buildbot network. Only
//!   the presence of the environment variable matters, not its value.
//!
//! The gates are independent; a test needing the virtual instrument usually
//! requires both.

use std::fmt;

use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::probe::{self, CapabilityFlag};

/// Environment variable enabling the virtual instrument tier.
pub const VIRTUAL_INSTRUMENT_ENV: &str = "VISA_KEYSIGHT_VIRTUAL_INSTR";

/// Reason reported for tests skipped by [`BackendGate`].
pub const REQUIRES_VISA_LIBRARY: &str =
    "Requires an installed VISA library. Run on the VISA buildbot.";

/// Reason reported for tests skipped by [`VirtualInstrumentGate`].
pub const REQUIRES_VIRTUAL_INSTRUMENT: &str =
    "Requires the Keysight virtual instrument. Run on the VISA buildbot.";

/// What the runner should do with a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// All preconditions hold.
    Run,
    /// A precondition is missing.
    Skip {
        /// Fixed, human-readable reason reported for the skipped test.
        reason: &'static str,
    },
}

impl GateDecision {
    /// `true` for [`GateDecision::Skip`].
    pub fn is_skip(&self) -> bool {
        matches!(self, GateDecision::Skip { .. })
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Run => write!(f, "run"),
            GateDecision::Skip { reason } => write!(f, "skip: {reason}"),
        }
    }
}

/// A run/skip predicate with a fixed reason.
pub trait Gate: Send + Sync {
    /// Reason reported when the gate is closed.
    fn reason(&self) -> &'static str;

    /// Whether eligible tests may run. Errors mean the environment is
    /// broken and must fail the test, not skip it.
    fn is_open(&self) -> HarnessResult<bool>;

    /// Turns the predicate into a decision.
    fn decide(&self) -> HarnessResult<GateDecision> {
        let decision = if self.is_open()? {
            GateDecision::Run
        } else {
            GateDecision::Skip {
                reason: self.reason(),
            }
        };
        debug!(%decision, "gate evaluated");
        Ok(decision)
    }
}

/// Open when a VISA backend is present.
#[derive(Debug, Clone, Default)]
pub struct BackendGate {
    flag: Option<CapabilityFlag>,
}

impl BackendGate {
    /// Gate reading the process-wide memoized probe.
    pub fn new() -> Self {
        Self { flag: None }
    }

    /// Gate bound to an explicit probe result.
    pub fn with_flag(flag: CapabilityFlag) -> Self {
        Self { flag: Some(flag) }
    }
}

impl Gate for BackendGate {
    fn reason(&self) -> &'static str {
        REQUIRES_VISA_LIBRARY
    }

    fn is_open(&self) -> HarnessResult<bool> {
        match &self.flag {
            Some(flag) => Ok(flag.is_present()),
            None => probe::is_backend_present(),
        }
    }
}

/// Open when the virtual instrument environment variable is set.
#[derive(Debug, Clone)]
pub struct VirtualInstrumentGate {
    env_var: String,
}

impl Default for VirtualInstrumentGate {
    fn default() -> Self {
        Self::new(VIRTUAL_INSTRUMENT_ENV)
    }
}

impl VirtualInstrumentGate {
    /// Gate on a custom variable name.
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
        }
    }

    /// Gate on the variable named in the configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.virtual_instrument.env_var.clone())
    }

    /// The variable this gate looks at.
    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    /// `true` iff the variable is present, whatever its value.
    pub fn is_virtual_instrument_available(&self) -> bool {
        std::env::var_os(&self.env_var).is_some()
    }
}

impl Gate for VirtualInstrumentGate {
    fn reason(&self) -> &'static str {
        REQUIRES_VIRTUAL_INSTRUMENT
    }

    fn is_open(&self) -> HarnessResult<bool> {
        Ok(self.is_virtual_instrument_available())
    }
}

/// Shorthand for the default virtual instrument gate.
pub fn is_virtual_instrument_available() -> bool {
    VirtualInstrumentGate::default().is_virtual_instrument_available()
}

/// Evaluates gates in order; the first closed gate decides.
pub fn decide_all(gates: &[&dyn Gate]) -> HarnessResult<GateDecision> {
    for gate in gates {
        let decision = gate.decide()?;
        if decision.is_skip() {
            return Ok(decision);
        }
    }
    Ok(GateDecision::Run)
}

/// Returns early from a test when a gate is closed.
///
/// Must be used inside a function returning `Result<(), E>` where `E` can be
/// built from [`HarnessError`](crate::error::HarnessError) (e.g.
/// `anyhow::Result<()>`); a broken environment propagates through `?`.
///
/// ```
/// use visa_harness::gate::VirtualInstrumentGate;
/// use visa_harness::skip_unless;
///
/// fn talks_to_virtual_instrument() -> anyhow::Result<()> {
///     skip_unless!(VirtualInstrumentGate::new("SOME_UNSET_VARIABLE_FOR_DOCS"));
///     unreachable!("gate is closed");
/// }
///
/// talks_to_virtual_instrument().unwrap();
/// ```
#[macro_export]
macro_rules! skip_unless {
    ($($gate:expr),+ $(,)?) => {
        $(
            if let $crate::gate::GateDecision::Skip { reason } =
                $crate::gate::Gate::decide(&$gate)?
            {
                eprintln!("[SKIP] {}", reason);
                return Ok(());
            }
        )+
    };
}
