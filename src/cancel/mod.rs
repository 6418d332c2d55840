//! Cooperative cancellation for long-running worker operations.
//!
//! A worker wraps a long operation with [`run_monitored`], naming a stop
//! condition ([`StopProbe`]) and the value to produce if the condition trips
//! ([`AbortReturn`]). Inside the operation, [`CancelScope::checkpoint`]
//! re-evaluates the condition at loop heads and before expensive sub-steps;
//! once it trips, no further statements of the operation run and the wrapper
//! returns [`Outcome::Cancelled`] carrying the abort value instead of the
//! natural result.
//!
//! Nested phases of one operation can register their own abort value with
//! [`CancelScope::step`], so "we stopped while loading" and "we stopped while
//! writing" can report different partial results without threading extra
//! state through every call.
//!
//! # Fail-open probes
//!
//! A probe that fails to evaluate (for example a [`watch`] channel whose
//! sender is gone) is logged at warn level and treated as "condition not
//! met". Monitoring must never destabilize the host operation. Callers that
//! want a broken monitor to be a hard configuration error can check the probe
//! once up front with [`validate`].
//!
//! # Threading
//!
//! The check runs synchronously on the thread executing the monitored
//! operation; the only cross-thread piece is the flag itself. [`StopFlag`]
//! provides that flag with the visibility guarantees of a watch channel.

pub mod scope;

pub use scope::{AbortReturn, CancelScope, Interrupted, Outcome, StepResult, run_monitored};

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors a stop condition can hit while being evaluated.
///
/// These never propagate out of a checkpoint; see the module docs.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("monitored value is unreachable: {0}")]
    Unreachable(String),

    #[error("stop condition evaluation failed: {0}")]
    Evaluation(String),
}

/// A monitored stop condition.
///
/// Implementations resolve whatever state they monitor and report whether the
/// stop condition currently holds. Closures `Fn() -> bool` implement this
/// trait directly; fallible conditions go through [`CheckedProbe`].
pub trait StopProbe {
    fn sample(&self) -> Result<bool, ProbeError>;
}

impl<F> StopProbe for F
where
    F: Fn() -> bool,
{
    fn sample(&self) -> Result<bool, ProbeError> {
        Ok(self())
    }
}

/// Watch-channel receivers are probes; a closed channel (sender dropped) is
/// an unreachable monitored value and degrades to "not tripped".
impl StopProbe for watch::Receiver<bool> {
    fn sample(&self) -> Result<bool, ProbeError> {
        if self.has_changed().is_err() {
            return Err(ProbeError::Unreachable("stop channel closed".to_string()));
        }
        Ok(*self.borrow())
    }
}

/// Adapter for fallible stop conditions.
pub struct CheckedProbe<F>(pub F);

impl<F> StopProbe for CheckedProbe<F>
where
    F: Fn() -> Result<bool, ProbeError>,
{
    fn sample(&self) -> Result<bool, ProbeError> {
        (self.0)()
    }
}

/// Check a probe once, surfacing any evaluation error.
///
/// Use at wrap time when a mistyped or dangling monitor should be a
/// configuration error rather than a silently inert checkpoint.
pub fn validate<P: StopProbe>(probe: &P) -> Result<(), ProbeError> {
    probe.sample().map(|_| ())
}

/// Shared cancellation flag.
///
/// Cloneable; any holder may set it, and checkpoints on the worker thread
/// observe the write promptly. This is the flag a "stop" button flips.
#[derive(Debug, Clone)]
pub struct StopFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl StopFlag {
    /// Create a flag in the unset state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Return the flag to the unset state for reuse across operations.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Whether cancellation has been requested.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver that can await or sample the flag independently.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl StopProbe for StopFlag {
    fn sample(&self) -> Result<bool, ProbeError> {
        Ok(self.is_set())
    }
}
