//! Progress reporting protocol, built on the request/response bus.
//!
//! The host application has a single visible progress indicator, so at most
//! one worker session may drive it at a time. Exclusive use is arbitrated by
//! message passing, not a lock:
//!
//! - a worker calls [`ProgressClient::acquire`]; while another session is
//!   active the owner replies "wait n seconds" and the client sleeps and
//!   retries (the system's backpressure policy)
//! - once granted, the worker sends fire-and-forget ticks through its
//!   [`ProgressHandle`] and releases when done — or the handle's `Drop`
//!   releases for it, so an aborted operation always frees the indicator
//!
//! The owner side of the state machine lives in [`GaugeController`], which an
//! [`OwnerHandler`](crate::bus::OwnerHandler) delegates gauge requests to.
//! The actual widget is behind the [`GaugeSink`] trait.
//!
//! Two further request shapes share the bus but are independent of the gauge
//! session: relaying status text ([`ProgressClient::post`]) and asking the
//! user a mid-operation question ([`ProgressClient::confirm_missing_models`]).

use crate::bus::{MessageColor, Request, RequestBus, Response, SessionToken, UserDecision};
use crate::config::ProgressSettings;
use crate::metrics::Metrics;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to workers using the progress protocol.
///
/// A [`Protocol`](ProgressError::Protocol) error is fatal for the current
/// operation: abort cleanly and release anything acquired.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("no owner handler is available to service progress requests")]
    OwnerUnavailable,

    #[error("protocol error: unexpected reply {0:?}")]
    Protocol(Response),
}

/// Worker-side client for the progress protocol.
#[derive(Clone)]
pub struct ProgressClient {
    bus: RequestBus,
}

impl ProgressClient {
    pub fn new(bus: RequestBus) -> Self {
        Self { bus }
    }

    /// Request exclusive use of the shared progress indicator.
    ///
    /// Blocks until the owner grants the gauge, sleeping out every
    /// "wait n seconds" reply while another session holds it.
    ///
    /// # Errors
    ///
    /// [`ProgressError::OwnerUnavailable`] when no owner handler is
    /// registered, [`ProgressError::Protocol`] on any reply that is neither
    /// a wait nor a grant.
    pub fn acquire(&self, total_units: usize) -> Result<ProgressHandle, ProgressError> {
        loop {
            match self.bus.call(Request::AcquireGauge { total_units }) {
                Response::Wait { seconds } => {
                    tracing::debug!(seconds, "progress gauge busy; waiting to retry");
                    thread::sleep(Duration::from_secs(seconds.max(1)));
                }
                Response::Granted { token } => {
                    tracing::debug!(token = token.value(), total_units, "progress gauge acquired");
                    return Ok(ProgressHandle {
                        bus: self.bus.clone(),
                        token,
                        released: Cell::new(false),
                    });
                }
                Response::NoHandler => return Err(ProgressError::OwnerUnavailable),
                other => return Err(ProgressError::Protocol(other)),
            }
        }
    }

    /// Relay a line of status text to the owner. Fire-and-forget.
    pub fn post(&self, text: &str, color: MessageColor, timestamp: bool) {
        let _ = self.bus.call(Request::Message {
            text: text.to_string(),
            color,
            timestamp,
        });
    }

    /// Ask the user whether to continue despite the named missing models.
    ///
    /// Blocks until the user answers. Any reply other than a decision is a
    /// protocol error; callers treat it like [`UserDecision::Exit`] plus a
    /// fault report.
    pub fn confirm_missing_models(
        &self,
        names: Vec<String>,
    ) -> Result<UserDecision, ProgressError> {
        match self.bus.call(Request::MissingModels { names }) {
            Response::Decision(decision) => Ok(decision),
            Response::NoHandler => Err(ProgressError::OwnerUnavailable),
            other => Err(ProgressError::Protocol(other)),
        }
    }
}

/// One granted gauge session.
///
/// Dropping the handle releases the gauge, so early returns and cancelled
/// operations cannot leave the indicator stuck at its last value.
pub struct ProgressHandle {
    bus: RequestBus,
    token: SessionToken,
    released: Cell<bool>,
}

impl ProgressHandle {
    /// Update the visible indicator. Fire-and-forget; no backpressure.
    pub fn tick(&self, current: usize, total: usize, label: &str) {
        let _ = self.bus.call(Request::GaugeTick {
            current,
            total,
            label: label.to_string(),
        });
    }

    /// Release the gauge. Idempotent; also called on drop.
    pub fn release(&self) {
        if !self.released.replace(true) {
            let _ = self.bus.call(Request::ReleaseGauge);
            tracing::debug!(token = self.token.value(), "progress gauge released");
        }
    }

    /// Token identifying this session.
    pub fn token(&self) -> SessionToken {
        self.token
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("token", &self.token)
            .field("released", &self.released.get())
            .finish()
    }
}

/// The visible progress indicator, as the owner sees it.
///
/// Implemented by the host UI (a gauge widget, a terminal bar, a test
/// recorder). All calls arrive on the owner thread.
pub trait GaugeSink: Send {
    /// A session was granted; prepare the indicator for `total_units`.
    fn begin(&mut self, total_units: usize);

    /// Advance the indicator.
    fn update(&mut self, current: usize, total: usize, label: &str);

    /// The session ended; reset the indicator.
    fn finish(&mut self);
}

/// State of the currently granted session.
struct ActiveSession {
    token: SessionToken,
    total_units: usize,
}

/// Owner-side gauge state machine: idle, or exclusively owned by one session.
///
/// An owner handler delegates gauge requests here and handles everything
/// else itself:
///
/// ```ignore
/// let controller = Mutex::new(GaugeController::new(sink, &settings.progress));
/// owner.register_handler(move |request: &Request| {
///     if let Some(response) = controller.lock().unwrap().handle(request) {
///         return response;
///     }
///     // ... decide MissingModels / Message / anything app-specific ...
///     Response::ProtocolError
/// });
/// ```
pub struct GaugeController<S: GaugeSink> {
    sink: S,
    active: Option<ActiveSession>,
    wait_seconds: u64,
    label_limit: usize,
    next_token: u64,
    metrics: Option<Arc<Metrics>>,
}

impl<S: GaugeSink> GaugeController<S> {
    pub fn new(sink: S, settings: &ProgressSettings) -> Self {
        Self {
            sink,
            active: None,
            // A zero wait would make blocked workers spin on the owner.
            wait_seconds: settings.wait_seconds.max(1),
            label_limit: settings.label_limit,
            next_token: 0,
            metrics: None,
        }
    }

    /// Attach traffic counters (normally the bus's own).
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle a gauge request, or return `None` for anything that is not
    /// gauge traffic so the owner handler can decide it.
    pub fn handle(&mut self, request: &Request) -> Option<Response> {
        match request {
            Request::AcquireGauge { total_units } => Some(self.acquire(*total_units)),
            Request::GaugeTick {
                current,
                total,
                label,
            } => Some(self.tick(*current, *total, label)),
            Request::ReleaseGauge => Some(self.release()),
            _ => None,
        }
    }

    /// Whether a session currently owns the gauge.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn acquire(&mut self, total_units: usize) -> Response {
        if self.active.is_some() {
            tracing::debug!(
                wait_seconds = self.wait_seconds,
                "gauge busy; telling caller to retry"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_gauge_wait();
            }
            return Response::Wait {
                seconds: self.wait_seconds,
            };
        }

        self.next_token += 1;
        let token = SessionToken::new(self.next_token);
        self.active = Some(ActiveSession { token, total_units });
        self.sink.begin(total_units);

        tracing::debug!(token = token.value(), total_units, "gauge session granted");
        if let Some(metrics) = &self.metrics {
            metrics.record_gauge_session();
        }
        Response::Granted { token }
    }

    fn tick(&mut self, current: usize, total: usize, label: &str) -> Response {
        if self.active.is_none() {
            // Tick from a session that already released; acknowledge and drop.
            tracing::warn!(current, total, "gauge tick with no active session");
            return Response::Ack;
        }

        let label: String = label.chars().take(self.label_limit).collect();
        self.sink.update(current, total, &label);

        if let Some(metrics) = &self.metrics {
            metrics.record_gauge_tick();
        }
        Response::Ack
    }

    fn release(&mut self) -> Response {
        if let Some(session) = self.active.take() {
            tracing::debug!(
                token = session.token.value(),
                total_units = session.total_units,
                "gauge session closed"
            );
            self.sink.finish();
        }
        Response::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressSettings;

    /// Sink that records every call for assertions.
    #[derive(Default)]
    struct RecordingSink {
        begun: Vec<usize>,
        updates: Vec<(usize, usize, String)>,
        finishes: usize,
    }

    impl GaugeSink for RecordingSink {
        fn begin(&mut self, total_units: usize) {
            self.begun.push(total_units);
        }

        fn update(&mut self, current: usize, total: usize, label: &str) {
            self.updates.push((current, total, label.to_string()));
        }

        fn finish(&mut self) {
            self.finishes += 1;
        }
    }

    fn controller() -> GaugeController<RecordingSink> {
        GaugeController::new(RecordingSink::default(), &ProgressSettings::default())
    }

    #[test]
    fn test_acquire_when_idle_grants_a_token() {
        let mut controller = controller();

        let response = controller.handle(&Request::AcquireGauge { total_units: 10 });
        assert!(matches!(response, Some(Response::Granted { .. })));
        assert!(controller.is_active());
        assert_eq!(controller.sink.begun, vec![10]);
    }

    #[test]
    fn test_acquire_while_active_yields_positive_wait() {
        let mut controller = controller();
        controller.handle(&Request::AcquireGauge { total_units: 10 });

        let response = controller.handle(&Request::AcquireGauge { total_units: 5 });
        match response {
            Some(Response::Wait { seconds }) => assert!(seconds > 0),
            other => panic!("expected wait, got {other:?}"),
        }

        // The active session was not replaced.
        assert_eq!(controller.sink.begun, vec![10]);
    }

    #[test]
    fn test_release_is_idempotent_and_frees_the_gauge() {
        let mut controller = controller();
        controller.handle(&Request::AcquireGauge { total_units: 10 });

        assert_eq!(controller.handle(&Request::ReleaseGauge), Some(Response::Ack));
        assert_eq!(controller.handle(&Request::ReleaseGauge), Some(Response::Ack));
        assert!(!controller.is_active());
        assert_eq!(controller.sink.finishes, 1);

        // A new session gets a fresh token.
        let first = controller.handle(&Request::AcquireGauge { total_units: 1 });
        match first {
            Some(Response::Granted { token }) => assert_eq!(token.value(), 2),
            other => panic!("expected grant, got {other:?}"),
        }
    }

    #[test]
    fn test_tick_forwards_to_sink_and_truncates_label() {
        let settings = ProgressSettings {
            label_limit: 5,
            ..ProgressSettings::default()
        };
        let mut controller = GaugeController::new(RecordingSink::default(), &settings);
        controller.handle(&Request::AcquireGauge { total_units: 2 });

        controller.handle(&Request::GaugeTick {
            current: 1,
            total: 2,
            label: "loading roster".to_string(),
        });

        assert_eq!(controller.sink.updates, vec![(1, 2, "loadi".to_string())]);
    }

    #[test]
    fn test_tick_without_session_is_acknowledged_not_forwarded() {
        let mut controller = controller();

        let response = controller.handle(&Request::GaugeTick {
            current: 1,
            total: 2,
            label: String::new(),
        });

        assert_eq!(response, Some(Response::Ack));
        assert!(controller.sink.updates.is_empty());
    }

    #[test]
    fn test_non_gauge_requests_fall_through() {
        let mut controller = controller();
        assert!(controller.handle(&Request::MissingModels { names: vec![] }).is_none());
        assert!(
            controller
                .handle(&Request::Message {
                    text: String::new(),
                    color: MessageColor::Default,
                    timestamp: false,
                })
                .is_none()
        );
    }

    #[test]
    fn test_zero_wait_setting_is_clamped() {
        let settings = ProgressSettings {
            wait_seconds: 0,
            ..ProgressSettings::default()
        };
        let mut controller = GaugeController::new(RecordingSink::default(), &settings);
        controller.handle(&Request::AcquireGauge { total_units: 1 });

        match controller.handle(&Request::AcquireGauge { total_units: 1 }) {
            Some(Response::Wait { seconds }) => assert!(seconds > 0),
            other => panic!("expected wait, got {other:?}"),
        }
    }
}
