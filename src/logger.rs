//! The shared, named logger exposed by the VISA binding.
//!
//! The binding emits its diagnostics through `tracing` under a single target
//! prefix (`visa` by default). [`SharedLogger`] owns that name and keeps an
//! explicit list of attached [`LogHandler`]s. Its [`LoggerLayer`] is added to
//! the process subscriber next to the normal output layers; it converts every
//! matching event into a [`LogRecord`] and hands it to the handlers whose
//! threshold admits the event's level.
//!
//! Attaching or detaching a handler never touches the other layers of the
//! subscriber, so normal log output is delivered exactly as before.
//!
//! Note that `tracing::Level` orders verbosity, not severity: `ERROR` is the
//! *smallest* level. "Warning and above" therefore means `level <= WARN`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::HarnessConfig;

/// Target prefix used by the VISA binding for all of its events.
pub const LOGGER_NAME: &str = "visa";

static VISA_LOGGER: Lazy<SharedLogger> = Lazy::new(|| SharedLogger::new(LOGGER_NAME));

/// Returns the process-wide logger of the VISA binding.
pub fn visa_logger() -> &'static SharedLogger {
    &VISA_LOGGER
}

/// A structured copy of one emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// When the record was created.
    pub timestamp: DateTime<Local>,
    /// Severity.
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    /// Name of the logger (the event's target).
    pub logger: String,
    /// Rendered message text.
    pub message: String,
    /// Every non-message field of the event, rendered as text.
    pub fields: BTreeMap<String, String>,
    /// Module that emitted the event.
    pub module_path: Option<String>,
    /// Source file of the call site.
    pub file: Option<String>,
    /// Source line of the call site.
    pub line: Option<u32>,
}

fn serialize_level<S: serde::Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(level.as_str())
}

impl LogRecord {
    /// Builds a record by hand. Mostly useful for tests and for forwarding
    /// records that did not originate from a `tracing` event.
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            logger: logger.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            module_path: None,
            file: None,
            line: None,
        }
    }

    /// Adds an attribute to the record.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// `true` for `WARN` and `ERROR`.
    pub fn is_warning_or_above(&self) -> bool {
        self.level <= Level::WARN
    }

    fn from_event(event: &Event<'_>) -> Self {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());

        Self {
            timestamp: Local::now(),
            level: *metadata.level(),
            logger: metadata.target().to_string(),
            message,
            fields: visitor.fields,
            module_path: metadata.module_path().map(str::to_string),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
        }
    }
}

/// Collects the message and the remaining fields of an event.
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), value.to_string());
        }
    }
}

/// Receiver of records routed by a [`SharedLogger`].
pub trait LogHandler: Send + Sync {
    /// Least severe level this handler accepts.
    fn threshold(&self) -> Level;

    /// Processes one record that passed the threshold.
    fn emit(&self, record: &LogRecord);

    /// Asked after every `emit`; a `true` answer triggers [`LogHandler::flush`].
    fn should_flush(&self, _record: &LogRecord) -> bool {
        true
    }

    /// Drains whatever the handler buffered.
    fn flush(&self) {}
}

/// Token returned by [`SharedLogger::add_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct LoggerInner {
    name: String,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn LogHandler>)>>,
    next_id: AtomicU64,
}

/// A named logger with an explicit handler registration API.
///
/// Cloning is cheap and every clone refers to the same handler list.
#[derive(Clone)]
pub struct SharedLogger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for SharedLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLogger")
            .field("name", &self.inner.name)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl SharedLogger {
    /// Creates a logger owning the given target prefix.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                name: name.into(),
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Logger named after `logger.name` in the configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.logger.name.clone())
    }

    /// The logger's name, i.e. the target prefix it owns.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `true` if an event with this target belongs to the logger
    /// (`visa` and `visa::*` for a logger named `visa`).
    pub fn owns_target(&self, target: &str) -> bool {
        let name = self.name();
        match target.strip_prefix(name) {
            Some(rest) => rest.is_empty() || rest.starts_with("::"),
            None => false,
        }
    }

    /// Subscribes a handler. Records are delivered until the returned id is
    /// passed to [`SharedLogger::remove_handler`].
    pub fn add_handler(&self, handler: Arc<dyn LogHandler>) -> HandlerId {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().push((id, handler));
        id
    }

    /// Unsubscribes a handler. Returns `false` if it was not attached.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of currently attached handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Routes a record to every attached handler whose threshold admits it.
    pub fn dispatch(&self, record: &LogRecord) {
        // Snapshot so a handler may detach itself from inside `emit`.
        let handlers: Vec<Arc<dyn LogHandler>> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            if record.level > handler.threshold() {
                continue;
            }
            handler.emit(record);
            if handler.should_flush(record) {
                handler.flush();
            }
        }
    }

    /// `true` if this logger's layer is part of the subscriber active on the
    /// current thread. Only the outermost [`LoggerLayer`] of a subscriber is
    /// looked at.
    pub fn is_installed(&self) -> bool {
        tracing::dispatcher::get_default(|dispatch| {
            dispatch
                .downcast_ref::<LoggerLayer>()
                .is_some_and(|layer| Arc::ptr_eq(&layer.logger.inner, &self.inner))
        })
    }

    /// Layer that feeds this logger from a `tracing` subscriber.
    pub fn layer(&self) -> LoggerLayer {
        LoggerLayer {
            logger: self.clone(),
        }
    }
}

/// `tracing_subscriber` layer forwarding the logger's events to its handlers.
#[derive(Clone, Debug)]
pub struct LoggerLayer {
    logger: SharedLogger,
}

impl<S> Layer<S> for LoggerLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.logger.owns_target(event.metadata().target()) {
            return;
        }
        // Nothing listening, skip the field formatting.
        if self.logger.handler_count() == 0 {
            return;
        }
        self.logger.dispatch(&LogRecord::from_event(event));
    }
}
