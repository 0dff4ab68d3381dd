//! Backend capability detection.
//!
//! Whether a VISA implementation is usable is decided once per process, at
//! start-up, by opening the default resource manager ([`initialize`] or
//! [`initialize_from_config`]). The result is memoized in a `OnceLock`;
//! capability never changes mid-run and [`global`] only ever reads it.
//!
//! Only [`ProbeError::LibraryNotFound`] is read as "backend absent". Any other
//! failure means the machine is misconfigured and is memoized as an error, so
//! every gated test reports it instead of silently skipping.
//!
//! # Example
//! ```
//! use visa_harness::probe::{CapabilityProbe, StaticBackend};
//! use visa_harness::error::ProbeError;
//!
//! let absent = StaticBackend::failing(ProbeError::LibraryNotFound("no visa".into()));
//! let flag = CapabilityProbe::run(&absent).unwrap();
//! assert!(!flag.is_present());
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::config::{BackendKind, HarnessConfig};
use crate::error::{HarnessError, HarnessResult, ProbeError};

/// Environment variable naming the VISA shared library explicitly.
pub const VISA_LIBRARY_ENV: &str = "VISA_LIBRARY";

static CAPABILITY: OnceLock<Result<CapabilityFlag, ProbeError>> = OnceLock::new();

/// Something that can attempt to open the default resource manager.
pub trait ResourceManagerBackend: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Opens (and immediately releases) the default resource manager.
    fn open_default_rm(&self) -> Result<(), ProbeError>;
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityFlag {
    present: bool,
    backend: String,
    detail: Option<String>,
}

impl CapabilityFlag {
    /// `true` if the resource manager opened.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Name of the probed backend.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Why the backend is absent, when it is.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

/// Runs a single probe without memoization.
pub struct CapabilityProbe;

impl CapabilityProbe {
    /// Probes `backend` once.
    ///
    /// Returns `Ok(flag)` for both "present" and "library not found"; every
    /// other error is returned unchanged.
    pub fn run(backend: &dyn ResourceManagerBackend) -> Result<CapabilityFlag, ProbeError> {
        match backend.open_default_rm() {
            Ok(()) => {
                info!(backend = backend.name(), "VISA resource manager available");
                Ok(CapabilityFlag {
                    present: true,
                    backend: backend.name().to_string(),
                    detail: None,
                })
            }
            Err(ProbeError::LibraryNotFound(detail)) => {
                info!(
                    backend = backend.name(),
                    %detail,
                    "No VISA library found; backend-gated tests will be skipped"
                );
                Ok(CapabilityFlag {
                    present: false,
                    backend: backend.name().to_string(),
                    detail: Some(detail),
                })
            }
            Err(err) => {
                warn!(backend = backend.name(), error = %err, "VISA backend probe failed");
                Err(err)
            }
        }
    }
}

/// Probes `backend` and memoizes the result for the process.
///
/// Called once at start-up, before any gate is evaluated. If the capability
/// was already initialized, the existing result is returned and `backend` is
/// not probed.
pub fn initialize(backend: &dyn ResourceManagerBackend) -> HarnessResult<&'static CapabilityFlag> {
    let result = CAPABILITY.get_or_init(|| CapabilityProbe::run(backend));
    result.as_ref().map_err(|err| HarnessError::Probe(err.clone()))
}

/// Probes the backend selected by `config` and memoizes the result.
pub fn initialize_from_config(config: &HarnessConfig) -> HarnessResult<&'static CapabilityFlag> {
    if CAPABILITY.get().is_some() {
        return global();
    }
    initialize(default_backend(config).as_ref())
}

/// The memoized capability.
///
/// Never probes: reading before [`initialize`] is an error, so a harness
/// that forgot its start-up step fails instead of skipping.
pub fn global() -> HarnessResult<&'static CapabilityFlag> {
    match CAPABILITY.get() {
        Some(result) => result.as_ref().map_err(|err| HarnessError::Probe(err.clone())),
        None => Err(HarnessError::ProbeNotInitialized),
    }
}

/// Pure read of the memoized "backend present" flag.
pub fn is_backend_present() -> HarnessResult<bool> {
    global().map(CapabilityFlag::is_present)
}

/// Backend selected by the configuration.
pub fn default_backend(config: &HarnessConfig) -> Box<dyn ResourceManagerBackend> {
    match config.backend.kind {
        BackendKind::SharedLibrary => Box::new(SharedLibraryBackend::from_config(config)),
        #[cfg(feature = "instrument_visa")]
        BackendKind::VisaRs => Box::new(VisaRsBackend),
        #[cfg(not(feature = "instrument_visa"))]
        BackendKind::VisaRs => Box::new(StaticBackend::failing(ProbeError::Configuration(
            "backend 'visa-rs' requested but the instrument_visa feature is not enabled".into(),
        ))),
    }
}

// VISA C API types
type ViStatus = i32;
type ViSession = u32;
type ViOpenDefaultRm = unsafe extern "system" fn(*mut ViSession) -> ViStatus;
type ViClose = unsafe extern "system" fn(ViSession) -> ViStatus;

/// Negative statuses are errors, positive ones are completion warnings.
const VI_SUCCESS: ViStatus = 0;

/// Loads the VISA shared library and opens its default resource manager.
///
/// An explicit path (configuration, then `VISA_LIBRARY`) wins and must point
/// to a loadable library. Without one, the platform's vendor install
/// locations are tried, then the dynamic loader's search path. Finding
/// nothing means the library is not installed; finding something that does
/// not load, lacks the VISA entry points or refuses to open a resource
/// manager is a misconfiguration.
#[derive(Debug, Clone)]
pub struct SharedLibraryBackend {
    explicit: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    loader_names: Vec<String>,
}

impl SharedLibraryBackend {
    /// Backend using the platform default search.
    pub fn new() -> Self {
        Self {
            explicit: std::env::var_os(VISA_LIBRARY_ENV).map(PathBuf::from),
            candidates: platform_candidates(),
            loader_names: platform_loader_names(),
        }
    }

    /// Backend honouring `backend.library_path` from the configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut backend = Self::new();
        if let Some(path) = &config.backend.library_path {
            backend.explicit = Some(path.clone());
        }
        backend
    }

    /// Backend with an explicit library path.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Replaces the install locations and turns off the dynamic loader
    /// search, so only `candidates` are considered.
    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self.loader_names.clear();
        self
    }

    /// Replaces the names handed to the dynamic loader.
    pub fn with_loader_names(mut self, names: Vec<String>) -> Self {
        self.loader_names = names;
        self
    }

    fn load(&self) -> Result<(Library, String), ProbeError> {
        if let Some(path) = &self.explicit {
            let path = check_explicit(path)?;
            return load_file(&path).map(|library| (library, path.display().to_string()));
        }

        for candidate in &self.candidates {
            debug!(path = %candidate.display(), "looking for VISA library");
            if candidate.is_file() {
                return load_file(candidate)
                    .map(|library| (library, candidate.display().to_string()));
            }
        }

        for name in &self.loader_names {
            match load_by_name(name) {
                Ok(library) => return Ok((library, name.clone())),
                Err(err) => debug!(library = %name, error = %err, "not on the loader path"),
            }
        }

        Err(ProbeError::LibraryNotFound(format!(
            "searched {} install location(s) and {} loader name(s); set {} to point at the library",
            self.candidates.len(),
            self.loader_names.len(),
            VISA_LIBRARY_ENV
        )))
    }
}

impl Default for SharedLibraryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_explicit(path: &Path) -> Result<PathBuf, ProbeError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(path.to_path_buf()),
        Ok(_) => Err(ProbeError::Configuration(format!(
            "VISA library path '{}' is not a file",
            path.display()
        ))),
        // An explicit path that doesn't exist is a configuration mistake,
        // not an absent installation.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ProbeError::Configuration(
            format!("VISA library path '{}' does not exist", path.display()),
        )),
        Err(err) => Err(ProbeError::Io(format!("{}: {}", path.display(), err))),
    }
}

#[allow(unsafe_code)]
fn load_file(path: &Path) -> Result<Library, ProbeError> {
    // SAFETY: loading runs the library's initialisers; the file is either the
    // path the operator configured or a vendor VISA install location.
    unsafe { Library::new(path) }.map_err(|err| {
        ProbeError::Configuration(format!(
            "'{}' could not be loaded as a VISA library: {err}",
            path.display()
        ))
    })
}

#[allow(unsafe_code)]
fn load_by_name(name: &str) -> Result<Library, libloading::Error> {
    // SAFETY: same as `load_file`, resolved through the loader search path.
    unsafe { Library::new(name) }
}

/// Opens the default resource manager of `library` and closes it again.
#[allow(unsafe_code)]
fn open_and_close(library: &Library, origin: &str) -> Result<(), ProbeError> {
    let missing = |symbol: &str, err: libloading::Error| {
        ProbeError::Configuration(format!("{origin} does not export {symbol}: {err}"))
    };

    // SAFETY: the signatures match the VISA C API:
    // ViStatus viOpenDefaultRM(ViPSession), ViStatus viClose(ViObject).
    let open: Symbol<ViOpenDefaultRm> = unsafe { library.get(b"viOpenDefaultRM\0") }
        .map_err(|err| missing("viOpenDefaultRM", err))?;
    let close: Symbol<ViClose> =
        unsafe { library.get(b"viClose\0") }.map_err(|err| missing("viClose", err))?;

    let mut session: ViSession = 0;
    // SAFETY: `session` is a writable ViSession on the stack for the whole call.
    let status = unsafe { open(&mut session) };
    if status < VI_SUCCESS {
        return Err(ProbeError::Backend(format!(
            "viOpenDefaultRM from {origin} returned status {status:#010x}"
        )));
    }

    // SAFETY: `session` was opened by the successful call above.
    let status = unsafe { close(session) };
    if status < VI_SUCCESS {
        warn!(library = origin, status, "viClose failed on the default resource manager");
    }
    Ok(())
}

impl ResourceManagerBackend for SharedLibraryBackend {
    fn name(&self) -> &str {
        "shared-library"
    }

    fn open_default_rm(&self) -> Result<(), ProbeError> {
        let (library, origin) = self.load()?;
        debug!(library = %origin, "VISA library loaded");
        open_and_close(&library, &origin)
    }
}

fn platform_candidates() -> Vec<PathBuf> {
    let names: &[&str] = if cfg!(target_os = "windows") {
        &[
            "C:\\Windows\\System32\\visa64.dll",
            "C:\\Windows\\System32\\visa32.dll",
        ]
    } else if cfg!(target_os = "macos") {
        &["/Library/Frameworks/VISA.framework/VISA"]
    } else {
        &[
            "/usr/lib/x86_64-linux-gnu/libvisa.so",
            "/usr/lib/x86_64-linux-gnu/libvisa.so.0",
            "/usr/lib64/libvisa.so",
            "/usr/lib/libvisa.so",
            "/usr/local/lib/libvisa.so",
            "/opt/keysight/iolibs/libvisa.so",
        ]
    };
    names.iter().map(PathBuf::from).collect()
}

fn platform_loader_names() -> Vec<String> {
    let names: &[&str] = if cfg!(target_os = "windows") {
        &["visa64.dll", "visa32.dll"]
    } else if cfg!(target_os = "macos") {
        &[]
    } else {
        &["libvisa.so", "libvisa.so.0"]
    };
    names.iter().map(|name| name.to_string()).collect()
}

/// Opens the default resource manager through `visa-rs`.
#[cfg(feature = "instrument_visa")]
#[derive(Debug, Clone, Copy, Default)]
pub struct VisaRsBackend;

#[cfg(feature = "instrument_visa")]
impl ResourceManagerBackend for VisaRsBackend {
    fn name(&self) -> &str {
        "visa-rs"
    }

    fn open_default_rm(&self) -> Result<(), ProbeError> {
        // visa-rs links the library at build time; reaching this point means
        // it is installed, so any status error is a configuration problem.
        visa_rs::DefaultRM::new()
            .map(drop)
            .map_err(|err| ProbeError::Backend(format!("{err:?}")))
    }
}

/// Backend with a fixed outcome.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    outcome: Result<(), ProbeError>,
}

impl StaticBackend {
    /// Backend whose resource manager always opens.
    pub fn present() -> Self {
        Self { outcome: Ok(()) }
    }

    /// Backend that always fails with `error`.
    pub fn failing(error: ProbeError) -> Self {
        Self {
            outcome: Err(error),
        }
    }
}

impl ResourceManagerBackend for StaticBackend {
    fn name(&self) -> &str {
        "static"
    }

    fn open_default_rm(&self) -> Result<(), ProbeError> {
        self.outcome.clone()
    }
}
