//! Checkpointed execution scope and the monitored-call wrapper.
//!
//! [`run_monitored`] is the entry point: it brackets a body with an entry
//! check, hands the body a [`CancelScope`] for checkpoints and nested steps,
//! and converts the internal [`Interrupted`] unwind into a value-carrying
//! [`Outcome::Cancelled`].

use super::StopProbe;
use std::cell::{Cell, RefCell};

/// Internal unwind signal raised by a tripped checkpoint.
///
/// Propagate it with `?`; never construct an abort value from it directly —
/// the scope resolves the configured [`AbortReturn`] at the moment of the
/// trip. Cancellation is not an error: real errors belong in the body's own
/// result type and pass through the wrapper unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Result alias for code running under a [`CancelScope`].
pub type StepResult<T> = Result<T, Interrupted>;

/// What the wrapper returns when the stop condition trips.
///
/// Either a literal value, or a capture resolved against whatever state the
/// closure observes at the moment of the trip — the latter is how a
/// cancelled operation reports the partial result it had computed so far.
pub enum AbortReturn<R> {
    Value(R),
    Capture(Box<dyn FnOnce() -> R>),
}

impl<R> AbortReturn<R> {
    /// Abort value computed at the moment the condition trips.
    pub fn capture<F>(f: F) -> Self
    where
        F: FnOnce() -> R + 'static,
    {
        AbortReturn::Capture(Box::new(f))
    }

    fn resolve(self) -> R {
        match self {
            AbortReturn::Value(value) => value,
            AbortReturn::Capture(f) => f(),
        }
    }
}

impl<R> From<R> for AbortReturn<R> {
    fn from(value: R) -> Self {
        AbortReturn::Value(value)
    }
}

/// Result of a monitored call: ran to completion, or was cancelled and
/// produced the configured abort value instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<R> {
    Completed(R),
    Cancelled(R),
}

impl<R> Outcome<R> {
    /// Whether the stop condition cut the operation short.
    pub fn was_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }

    /// The carried value, however the operation ended.
    pub fn into_inner(self) -> R {
        match self {
            Outcome::Completed(value) | Outcome::Cancelled(value) => value,
        }
    }

    /// The natural result, if the operation completed.
    pub fn completed(self) -> Option<R> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled(_) => None,
        }
    }
}

/// Execution context of one monitored call.
///
/// Passed by reference into the body given to [`run_monitored`]. Not `Send`:
/// the scope lives and dies on the thread running the monitored operation.
pub struct CancelScope<'p, R> {
    probe: &'p dyn StopProbe,

    /// Default abort value; consumed by the first trip outside any step.
    outer: RefCell<Option<AbortReturn<R>>>,

    /// Abort values of the currently active nested steps, innermost last.
    nested: RefCell<Vec<AbortReturn<R>>>,

    /// Resolved abort value, set exactly once at the moment of the trip.
    tripped: RefCell<Option<R>>,

    checks: Cell<u64>,
    probe_faults: Cell<u64>,
}

impl<'p, R> CancelScope<'p, R> {
    fn new(probe: &'p dyn StopProbe, abort: AbortReturn<R>) -> Self {
        Self {
            probe,
            outer: RefCell::new(Some(abort)),
            nested: RefCell::new(Vec::new()),
            tripped: RefCell::new(None),
            checks: Cell::new(0),
            probe_faults: Cell::new(0),
        }
    }

    /// Re-evaluate the stop condition.
    ///
    /// Call at loop heads and before expensive sub-steps. On a trip this
    /// resolves the innermost active abort value and returns `Err`; propagate
    /// it with `?` so no further statements of the operation run. Probe
    /// evaluation errors are fail-open: logged, counted, treated as "not
    /// tripped".
    pub fn checkpoint(&self) -> StepResult<()> {
        self.checks.set(self.checks.get() + 1);

        if self.tripped.borrow().is_some() {
            // Already tripped; keep refusing without re-resolving.
            return Err(Interrupted);
        }

        match self.probe.sample() {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.trip();
                Err(Interrupted)
            }
            Err(error) => {
                self.probe_faults.set(self.probe_faults.get() + 1);
                tracing::warn!(%error, "stop probe failed to resolve; treating as not tripped");
                Ok(())
            }
        }
    }

    /// Run a nested step with its own abort value.
    ///
    /// While `body` is the active frame, a trip resolves `abort` instead of
    /// the outer default, so each phase of a pipeline can report its own
    /// "we stopped here" value. The registration is removed when the step
    /// returns; steps nest arbitrarily.
    pub fn step<T, F>(&self, abort: impl Into<AbortReturn<R>>, body: F) -> StepResult<T>
    where
        F: FnOnce(&Self) -> StepResult<T>,
    {
        let depth = self.nested.borrow().len();
        self.nested.borrow_mut().push(abort.into());

        let result = match self.checkpoint() {
            Ok(()) => body(self),
            Err(interrupted) => Err(interrupted),
        };

        // A trip consumes the innermost registration itself; this covers the
        // normal-return path and keeps the stack balanced either way.
        self.nested.borrow_mut().truncate(depth);

        result
    }

    /// Number of probe evaluation errors swallowed so far.
    pub fn probe_faults(&self) -> u64 {
        self.probe_faults.get()
    }

    /// Resolve the innermost active abort value and latch it.
    fn trip(&self) {
        let abort = self
            .nested
            .borrow_mut()
            .pop()
            .or_else(|| self.outer.borrow_mut().take());
        if let Some(abort) = abort {
            *self.tripped.borrow_mut() = Some(abort.resolve());
        }
    }

    fn into_cancel_value(self) -> R {
        if let Some(value) = self.tripped.into_inner() {
            return value;
        }
        // The body returned Err(Interrupted) without a checkpoint trip;
        // fall back to the outer default.
        if let Some(abort) = self.outer.into_inner() {
            return abort.resolve();
        }
        unreachable!("cancel value is resolved exactly once");
    }
}

/// Run `body` under a stop condition.
///
/// The condition is checked once on entry (covering the case where it is
/// already true before any statement runs) and at every
/// [`checkpoint`](CancelScope::checkpoint) the body reaches thereafter. On a
/// trip the wrapper returns [`Outcome::Cancelled`] with the resolved abort
/// value; on normal return, [`Outcome::Completed`] with the body's result.
/// All monitoring state is dropped when this function returns — there is no
/// ambient instrumentation to restore, and panics from `body` unwind
/// unchanged.
///
/// ```
/// use taskbridge::cancel::{self, StopFlag};
///
/// let flag = StopFlag::new();
/// let outcome = cancel::run_monitored(&flag, 0usize, |scope| {
///     let mut done = 0;
///     for _ in 0..10 {
///         scope.checkpoint()?;
///         done += 1;
///     }
///     Ok(done)
/// });
/// assert_eq!(outcome.into_inner(), 10);
/// ```
pub fn run_monitored<P, R, F>(probe: &P, abort: impl Into<AbortReturn<R>>, body: F) -> Outcome<R>
where
    P: StopProbe,
    F: FnOnce(&CancelScope<'_, R>) -> StepResult<R>,
{
    let scope = CancelScope::new(probe, abort.into());

    let result = match scope.checkpoint() {
        Ok(()) => body(&scope),
        Err(interrupted) => Err(interrupted),
    };

    match result {
        Ok(value) => {
            tracing::trace!(
                checks = scope.checks.get(),
                probe_faults = scope.probe_faults.get(),
                "monitored call completed"
            );
            Outcome::Completed(value)
        }
        Err(Interrupted) => {
            tracing::debug!(
                checks = scope.checks.get(),
                probe_faults = scope.probe_faults.get(),
                "monitored call cancelled"
            );
            Outcome::Cancelled(scope.into_cancel_value())
        }
    }
}
