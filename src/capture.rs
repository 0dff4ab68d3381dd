//! Per-test log record collector.
//!
//! A [`LogCaptureHandler`] attaches a private buffer to a [`SharedLogger`]
//! and keeps every record routed to it, in emission order. Unlike a regular
//! buffering handler it never flushes: the buffer has to stay inspectable, in
//! full, until the test reads it.
//!
//! Lifecycle: `Inactive → Attached → Collecting → Detached`. Detaching freezes
//! the buffer; dropping the handler discards it. One handler per test.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, Level};

use crate::logger::{HandlerId, LogHandler, LogRecord, SharedLogger};

/// Where a capture handler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Created but never attached.
    Inactive,
    /// Subscribed to the logger, nothing captured yet.
    Attached,
    /// Subscribed and holding at least one record.
    Collecting,
    /// Unsubscribed; the buffer is frozen.
    Detached,
}

/// The part of the handler that lives inside the logger's handler list.
struct CaptureSink {
    threshold: Level,
    only_warnings: bool,
    buffer: Mutex<Vec<LogRecord>>,
}

impl LogHandler for CaptureSink {
    fn threshold(&self) -> Level {
        self.threshold
    }

    fn emit(&self, record: &LogRecord) {
        if self.only_warnings && record.level != Level::WARN {
            return;
        }
        self.buffer.lock().push(record.clone());
    }

    fn should_flush(&self, _record: &LogRecord) -> bool {
        false
    }
}

/// Collects the records a shared logger emits while a test runs.
pub struct LogCaptureHandler {
    sink: Arc<CaptureSink>,
    logger: Option<SharedLogger>,
    handler_id: Option<HandlerId>,
    detached: bool,
}

impl std::fmt::Debug for LogCaptureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCaptureHandler")
            .field("state", &self.state())
            .field("threshold", &self.sink.threshold)
            .field("only_warnings", &self.sink.only_warnings)
            .field("captured", &self.len())
            .finish()
    }
}

impl LogCaptureHandler {
    /// Creates an inactive handler.
    ///
    /// `min_level` is the least severe level accepted (`Level::WARN` for
    /// "warning and above", `Level::TRACE` for everything). With
    /// `only_warnings` set, records other than `WARN` are dropped even if
    /// they pass the threshold.
    pub fn new(min_level: Level, only_warnings: bool) -> Self {
        Self {
            sink: Arc::new(CaptureSink {
                threshold: min_level,
                only_warnings,
                buffer: Mutex::new(Vec::new()),
            }),
            logger: None,
            handler_id: None,
            detached: false,
        }
    }

    /// Creates a handler and attaches it to `logger` in one step.
    pub fn attach(logger: &SharedLogger, min_level: Level, only_warnings: bool) -> Self {
        let mut handler = Self::new(min_level, only_warnings);
        handler.attach_to(logger);
        handler
    }

    /// Subscribes the handler to `logger`.
    ///
    /// Attaching a handler that is already attached is a caller error; the
    /// call is ignored so the first subscription stays the only one.
    pub fn attach_to(&mut self, logger: &SharedLogger) {
        if self.handler_id.is_some() {
            debug!(logger = logger.name(), "capture handler already attached");
            return;
        }
        let sink: Arc<dyn LogHandler> = self.sink.clone();
        self.handler_id = Some(logger.add_handler(sink));
        self.logger = Some(logger.clone());
        self.detached = false;
    }

    /// Unsubscribes the handler. Further calls are no-ops.
    pub fn detach(&mut self) {
        if let (Some(logger), Some(id)) = (self.logger.take(), self.handler_id.take()) {
            logger.remove_handler(id);
            self.detached = true;
        }
    }

    /// Copy of the buffer, in emission order.
    pub fn buffer_snapshot(&self) -> Vec<LogRecord> {
        self.sink.buffer.lock().clone()
    }

    /// Number of records captured so far.
    pub fn len(&self) -> usize {
        self.sink.buffer.lock().len()
    }

    /// `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CaptureState {
        if self.detached {
            CaptureState::Detached
        } else if self.handler_id.is_none() {
            CaptureState::Inactive
        } else if self.is_empty() {
            CaptureState::Attached
        } else {
            CaptureState::Collecting
        }
    }
}

impl Drop for LogCaptureHandler {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: Level, message: &str) -> LogRecord {
        LogRecord::new(level, "visa", message)
    }

    #[test]
    fn test_lifecycle_states() {
        let logger = SharedLogger::new("visa");
        let mut handler = LogCaptureHandler::new(Level::WARN, false);
        assert_eq!(handler.state(), CaptureState::Inactive);

        handler.attach_to(&logger);
        assert_eq!(handler.state(), CaptureState::Attached);

        logger.dispatch(&record(Level::WARN, "overrun"));
        assert_eq!(handler.state(), CaptureState::Collecting);

        handler.detach();
        assert_eq!(handler.state(), CaptureState::Detached);
        assert_eq!(logger.handler_count(), 0);
    }

    #[test]
    fn test_captures_in_emission_order_without_flushing() {
        let logger = SharedLogger::new("visa");
        let handler = LogCaptureHandler::attach(&logger, Level::TRACE, false);

        for message in ["one", "two", "three"] {
            logger.dispatch(&record(Level::INFO, message));
        }

        let messages: Vec<_> = handler
            .buffer_snapshot()
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_only_warnings_keeps_exactly_warn_records() {
        let logger = SharedLogger::new("visa");
        let handler = LogCaptureHandler::attach(&logger, Level::TRACE, true);

        logger.dispatch(&record(Level::INFO, "opened session"));
        logger.dispatch(&record(Level::WARN, "termination character ignored"));
        logger.dispatch(&record(Level::ERROR, "session lost"));

        let buffer = handler.buffer_snapshot();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].message, "termination character ignored");
    }

    #[test]
    fn test_threshold_excludes_info_records() {
        let logger = SharedLogger::new("visa");
        let handler = LogCaptureHandler::attach(&logger, Level::WARN, false);

        logger.dispatch(&record(Level::INFO, "noise"));
        logger.dispatch(&record(Level::ERROR, "failure"));

        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn test_buffer_frozen_after_detach() {
        let logger = SharedLogger::new("visa");
        let mut handler = LogCaptureHandler::attach(&logger, Level::WARN, false);
        logger.dispatch(&record(Level::WARN, "before"));
        handler.detach();
        handler.detach();
        logger.dispatch(&record(Level::WARN, "after"));

        let buffer = handler.buffer_snapshot();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].message, "before");
    }

    #[test]
    fn test_sequential_handlers_are_isolated() {
        let logger = SharedLogger::new("visa");

        let mut first = LogCaptureHandler::attach(&logger, Level::WARN, false);
        logger.dispatch(&record(Level::WARN, "from test one"));
        first.detach();

        let second = LogCaptureHandler::attach(&logger, Level::WARN, false);
        logger.dispatch(&record(Level::WARN, "from test two"));

        let buffer = second.buffer_snapshot();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].message, "from test two");
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let logger = SharedLogger::new("visa");
        {
            let _handler = LogCaptureHandler::attach(&logger, Level::WARN, false);
            assert_eq!(logger.handler_count(), 1);
        }
        assert_eq!(logger.handler_count(), 0);
    }

    #[test]
    fn test_double_attach_keeps_single_subscription() {
        let logger = SharedLogger::new("visa");
        let mut handler = LogCaptureHandler::attach(&logger, Level::WARN, false);
        handler.attach_to(&logger);
        assert_eq!(logger.handler_count(), 1);

        logger.dispatch(&record(Level::WARN, "once"));
        assert_eq!(handler.len(), 1);
    }
}
