//! Metrics module for the barrier
//!
//! A provider facade for operation timers and counters. By default metrics
//! are disabled and use a no-op implementation. The barrier facade also
//! emits through the `metrics` crate macros directly; this module carries
//! the pluggable provider used by the per-service timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

// Global flag to check if metrics are enabled
static METRICS_ENABLED: AtomicBool = AtomicBool::new(false);

/// Metrics provider interface
pub trait MetricsProvider: Send + Sync {
    /// Records a counter increment
    fn increment_counter(&self, name: &str, value: u64);

    /// Records a timer duration
    fn record_timer(&self, name: &str, duration: Duration);
}

/// A no-op metrics provider that discards all metrics
#[derive(Debug, Default)]
pub struct NoopMetricsProvider;

impl NoopMetricsProvider {
    /// Create a new no-op metrics provider
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance ready for use with set_metrics_provider
    pub fn boxed() -> Box<dyn MetricsProvider> {
        Box::new(Self::new())
    }
}

impl MetricsProvider for NoopMetricsProvider {
    fn increment_counter(&self, _name: &str, _value: u64) {}
    fn record_timer(&self, _name: &str, _duration: Duration) {}
}

// Global metrics provider
static METRICS_PROVIDER: RwLock<Option<Box<dyn MetricsProvider>>> = RwLock::new(None);

/// Set the metrics provider for the barrier
pub fn set_metrics_provider(provider: Box<dyn MetricsProvider>) {
    let mut global_provider = METRICS_PROVIDER.write().unwrap();
    *global_provider = Some(provider);
    METRICS_ENABLED.store(true, Ordering::SeqCst);
}

/// Disable metrics collection
pub fn disable_metrics() {
    let mut global_provider = METRICS_PROVIDER.write().unwrap();
    *global_provider = None;
    METRICS_ENABLED.store(false, Ordering::SeqCst);
}

/// Check if metrics are enabled
pub fn metrics_enabled() -> bool {
    METRICS_ENABLED.load(Ordering::SeqCst)
}

/// Increment a counter metric
pub fn increment_counter(name: &str, value: u64) {
    if metrics_enabled() {
        if let Some(provider) = METRICS_PROVIDER.read().unwrap().as_ref() {
            provider.increment_counter(name, value);
        }
    }
}

/// Record a timer metric
pub fn record_timer(name: &str, duration: Duration) {
    if metrics_enabled() {
        if let Some(provider) = METRICS_PROVIDER.read().unwrap().as_ref() {
            provider.record_timer(name, duration);
        }
    }
}

/// Timer for measuring and recording operation duration
#[derive(Debug)]
pub struct Timer {
    /// Name of the timer metric
    name: String,

    /// Start time of the operation
    start: Instant,
}

impl Timer {
    /// Create a new timer with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub fn observe_duration(&self) {
        record_timer(&self.name, self.start.elapsed());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.observe_duration();
    }
}

/// Macro for creating a timer
#[macro_export]
macro_rules! timer {
    ($name:expr) => {{
        if $crate::metrics::metrics_enabled() {
            Some($crate::metrics::Timer::new($name))
        } else {
            None
        }
    }};
}

/// A provider that forwards metrics to the `log` crate at debug level
#[derive(Debug, Default)]
pub struct DebugLogMetricsProvider;

impl DebugLogMetricsProvider {
    /// Create a new debug-logging metrics provider
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance ready for use with set_metrics_provider
    pub fn boxed() -> Box<dyn MetricsProvider> {
        Box::new(Self::new())
    }
}

impl MetricsProvider for DebugLogMetricsProvider {
    fn increment_counter(&self, name: &str, value: u64) {
        log::debug!("METRIC counter: {} = {}", name, value);
    }

    fn record_timer(&self, name: &str, duration: Duration) {
        log::debug!("METRIC timer: {} = {:?}", name, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    struct CountingProvider {
        timers: Arc<AtomicU64>,
    }

    impl MetricsProvider for CountingProvider {
        fn increment_counter(&self, _name: &str, _value: u64) {}

        fn record_timer(&self, _name: &str, _duration: Duration) {
            self.timers.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn timer_observes_on_drop_when_enabled() {
        let timers = Arc::new(AtomicU64::new(0));
        set_metrics_provider(Box::new(CountingProvider {
            timers: timers.clone(),
        }));
        assert!(metrics_enabled());

        {
            let _timer = timer!("barrier.test.op");
        }
        assert!(timers.load(Ordering::SeqCst) >= 1);

        disable_metrics();
        assert!(!metrics_enabled());
        assert!(timer!("barrier.test.op").is_none());
    }
}
