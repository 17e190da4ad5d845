//! Logging module for the barrier
//!
//! A minimal pluggable debug-logging interface. By default logging is
//! disabled and uses a no-op implementation. Debug lines describe tiers and
//! stored record ids; they never carry key bytes, unseal kids, or derivation
//! inputs.

use std::fmt;
use std::sync::RwLock;

/// Logger interface for the barrier
pub trait Logger: Send + Sync {
    /// Log a debug message
    fn debug(&self, message: &str);

    /// Log a debug message with formatting
    fn debugf(&self, fmt: fmt::Arguments<'_>);
}

/// A no-op logger that does nothing
#[derive(Debug, Default)]
pub struct NoopLogger;

impl NoopLogger {
    /// Create a new no-op logger
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance
    pub fn boxed() -> Box<dyn Logger> {
        Box::new(Self::new())
    }
}

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}
    fn debugf(&self, _fmt: fmt::Arguments<'_>) {}
}

// Global logger (default to noop)
static LOGGER: RwLock<Option<Box<dyn Logger>>> = RwLock::new(None);

/// Set the logger for the barrier
pub fn set_logger(logger: Box<dyn Logger>) {
    let mut global_logger = LOGGER.write().unwrap();
    *global_logger = Some(logger);
}

/// Check if debug logging is enabled
pub fn debug_enabled() -> bool {
    let global_logger = LOGGER.read().unwrap();
    global_logger.is_some()
}

/// Log a debug message
pub fn debug(message: &str) {
    let global_logger = LOGGER.read().unwrap();
    if let Some(logger) = global_logger.as_ref() {
        logger.debug(message);
    }
}

/// Log a formatted debug message
pub fn debugf(args: fmt::Arguments<'_>) {
    let global_logger = LOGGER.read().unwrap();
    if let Some(logger) = global_logger.as_ref() {
        logger.debugf(args);
    }
}

/// Macro for formatted debug logging
#[macro_export]
macro_rules! debugf {
    ($($arg:tt)*) => {
        $crate::log::debugf(format_args!($($arg)*))
    };
}

/// Provides a simple logger that writes to standard output
#[derive(Debug, Default)]
pub struct StdoutLogger;

impl StdoutLogger {
    /// Create a new stdout logger
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance
    pub fn boxed() -> Box<dyn Logger> {
        Box::new(Self::new())
    }
}

impl Logger for StdoutLogger {
    fn debug(&self, message: &str) {
        println!("[DEBUG] {}", message);
    }

    fn debugf(&self, fmt: fmt::Arguments<'_>) {
        println!("[DEBUG] {}", fmt);
    }
}

/// Helper struct to enable logging within a scope
///
/// Installs the given logger and restores the previous one when dropped, so
/// a caller (typically a test) can swap a logger in without leaking it into
/// later code.
pub struct LoggingGuard {
    previous_logger: Option<Box<dyn Logger>>,
}

impl fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("has_previous_logger", &self.previous_logger.is_some())
            .finish()
    }
}

impl LoggingGuard {
    /// Create a new logging guard with the given logger
    pub fn new(logger: Box<dyn Logger>) -> Self {
        let previous_logger = {
            let mut global_logger = LOGGER.write().unwrap();
            std::mem::replace(&mut *global_logger, Some(logger))
        };

        Self { previous_logger }
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        let mut global_logger = LOGGER.write().unwrap();
        *global_logger = self.previous_logger.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CapturingLogger {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl Logger for CapturingLogger {
        fn debug(&self, message: &str) {
            self.lines.lock().unwrap().push(message.to_string());
        }

        fn debugf(&self, fmt: fmt::Arguments<'_>) {
            self.lines.lock().unwrap().push(fmt.to_string());
        }
    }

    // One test covers capture and restore; the logger is process-global, so
    // splitting these would let parallel tests race on it
    #[test]
    fn logging_guard_captures_and_restores() {
        let outer = Arc::new(Mutex::new(Vec::new()));
        let _outer_guard = LoggingGuard::new(Box::new(CapturingLogger {
            lines: outer.clone(),
        }));
        assert!(debug_enabled());

        {
            let inner = Arc::new(Mutex::new(Vec::new()));
            let _inner_guard = LoggingGuard::new(Box::new(CapturingLogger {
                lines: inner.clone(),
            }));

            debug("inner line");
            debugf(format_args!("formatted {}", 42));

            let captured = inner.lock().unwrap();
            assert!(captured.contains(&"inner line".to_string()));
            assert!(captured.contains(&"formatted 42".to_string()));
        }

        // The outer logger is back in place once the inner guard drops
        debug("outer line");
        assert!(outer.lock().unwrap().contains(&"outer line".to_string()));
        assert!(!outer.lock().unwrap().contains(&"inner line".to_string()));
    }
}
