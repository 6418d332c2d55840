// Performance metrics module
//
// Provides lightweight metrics tracking for monitoring bus and progress traffic

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Coordination-layer metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// One instance is shared between every bus handle and the owner loop (see
/// [`crate::bus::channel_with_metrics`]); counters can be logged periodically
/// or on shutdown for diagnosis of stuck or chatty workers.
#[derive(Debug)]
pub struct Metrics {
    /// Requests placed on the owner queue
    pub requests_enqueued: AtomicU64,

    /// Requests the owner handler actually served
    pub requests_served: AtomicU64,

    /// Requests served in place because the caller was the owner thread
    pub self_calls: AtomicU64,

    /// Calls answered with the fixed no-handler reply
    pub no_handler_replies: AtomicU64,

    /// Reply slots that closed before a response could be delivered
    pub dropped_replies: AtomicU64,

    /// Gauge acquisitions granted
    pub gauge_sessions: AtomicU64,

    /// Acquire attempts answered with a wait-and-retry reply
    pub gauge_waits: AtomicU64,

    /// Gauge tick updates forwarded to the sink
    pub gauge_ticks: AtomicU64,

    /// Status messages relayed to the owner
    pub messages_relayed: AtomicU64,

    /// Creation time
    start_time: Instant,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            requests_enqueued: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
            self_calls: AtomicU64::new(0),
            no_handler_replies: AtomicU64::new(0),
            dropped_replies: AtomicU64::new(0),
            gauge_sessions: AtomicU64::new(0),
            gauge_waits: AtomicU64::new(0),
            gauge_ticks: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request placed on the owner queue
    pub fn record_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request served by the owner handler
    pub fn record_served(&self) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call served in place on the owner thread
    pub fn record_self_call(&self) {
        self.self_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call answered with the no-handler reply
    pub fn record_no_handler(&self) {
        self.no_handler_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply slot that closed before delivery
    pub fn record_dropped_reply(&self) {
        self.dropped_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a granted gauge session
    pub fn record_gauge_session(&self) {
        self.gauge_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a wait-and-retry reply to an acquire attempt
    pub fn record_gauge_wait(&self) {
        self.gauge_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a gauge tick forwarded to the sink
    pub fn record_gauge_tick(&self) {
        self.gauge_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a relayed status message
    pub fn record_message(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let uptime = self.uptime();
        tracing::info!("=== Coordination Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", uptime.as_secs_f64());
        tracing::info!(
            "Bus: {} enqueued, {} served, {} self-calls, {} no-handler, {} dropped replies",
            self.requests_enqueued.load(Ordering::Relaxed),
            self.requests_served.load(Ordering::Relaxed),
            self.self_calls.load(Ordering::Relaxed),
            self.no_handler_replies.load(Ordering::Relaxed),
            self.dropped_replies.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Gauge: {} sessions, {} waits, {} ticks; {} messages relayed",
            self.gauge_sessions.load(Ordering::Relaxed),
            self.gauge_waits.load(Ordering::Relaxed),
            self.gauge_ticks.load(Ordering::Relaxed),
            self.messages_relayed.load(Ordering::Relaxed)
        );
    }

    /// Log periodic metrics (for long-running operations)
    pub fn log_periodic(&self) {
        tracing::info!(
            "Metrics: {} requests served ({} in place), {} gauge ticks, uptime {:.0}s",
            self.requests_served.load(Ordering::Relaxed),
            self.self_calls.load(Ordering::Relaxed),
            self.gauge_ticks.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.requests_enqueued.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.requests_served.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_bus_traffic() {
        let metrics = Metrics::new();

        metrics.record_enqueued();
        metrics.record_served();
        metrics.record_served();
        metrics.record_self_call();
        metrics.record_no_handler();
        metrics.record_dropped_reply();

        assert_eq!(metrics.requests_enqueued.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_served.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.self_calls.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.no_handler_replies.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.dropped_replies.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_gauge_traffic() {
        let metrics = Metrics::new();

        metrics.record_gauge_session();
        metrics.record_gauge_wait();
        metrics.record_gauge_tick();
        metrics.record_gauge_tick();
        metrics.record_message();

        assert_eq!(metrics.gauge_sessions.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.gauge_waits.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.gauge_ticks.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.messages_relayed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }

    #[test]
    fn test_counters_from_multiple_threads() {
        let metrics = std::sync::Arc::new(Metrics::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = std::sync::Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_served();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.requests_served.load(Ordering::Relaxed), 400);
    }
}
