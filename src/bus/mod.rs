//! Cross-thread request/response bus.
//!
//! Worker threads performing long operations must not touch owner-owned state
//! (the UI) directly. Instead they send a [`Request`] through a [`RequestBus`]
//! and block until the owner thread's [`OwnerLoop`] produces the [`Response`].
//!
//! # Components
//!
//! - [`RequestBus`]: cloneable worker-side handle. [`RequestBus::call`] may be
//!   invoked from any thread, including the owner thread itself.
//! - [`OwnerLoop`]: the single consumer. Exactly one exists per bus; the
//!   thread that runs it is the designated owner thread.
//! - [`OwnerHandler`]: the one registered function that decides replies.
//!
//! # Guarantees
//!
//! - Exactly one response per request; a reply can never reach the wrong
//!   requester because the one-shot reply slot travels *with* the request.
//! - A call made from the owner thread itself is served synchronously in
//!   place, so the owner never deadlocks by queuing into itself.
//! - A call made before any handler is registered returns
//!   [`Response::NoHandler`] immediately instead of blocking forever.
//!
//! # Threading
//!
//! [`RequestBus::call`] parks the calling OS thread. Call it from plain
//! worker threads (`std::thread`), never from inside an async task.

pub mod protocol;

pub use protocol::{MessageColor, Request, Response, SessionToken, UserDecision};

use crate::metrics::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// The single function that decides replies on the owner thread.
///
/// Implementations should reply [`Response::ProtocolError`] to any request
/// they do not recognize; callers treat that as fatal for the current
/// operation. Closures `Fn(&Request) -> Response` implement this trait.
#[cfg_attr(test, mockall::automock)]
pub trait OwnerHandler: Send + Sync {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> OwnerHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// One in-flight request: id for logging, payload, and the one-shot reply
/// slot of the thread that is blocked waiting for it.
struct Envelope {
    id: u64,
    request: Request,
    reply: oneshot::Sender<Response>,
}

/// State shared between all bus handles and the owner loop.
struct BusShared {
    /// The registered decider. `None` until the owner installs one.
    handler: RwLock<Option<Arc<dyn OwnerHandler>>>,

    /// Thread id of the owner, recorded when the loop first runs or pumps.
    owner_thread: RwLock<Option<ThreadId>>,

    /// Monotonic request id, for logs and metrics only.
    next_request_id: AtomicU64,

    /// Traffic counters.
    metrics: Arc<Metrics>,
}

/// Create a connected bus: a cloneable worker handle and the owner loop.
///
/// `capacity` bounds the request queue; senders park when it is full, which
/// keeps a stalled owner from accumulating unbounded requests.
pub fn channel(capacity: usize) -> (RequestBus, OwnerLoop) {
    channel_with_metrics(capacity, Arc::new(Metrics::new()))
}

/// Like [`channel`], with caller-provided metrics (e.g. shared with other
/// subsystems of the host application).
pub fn channel_with_metrics(capacity: usize, metrics: Arc<Metrics>) -> (RequestBus, OwnerLoop) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(BusShared {
        handler: RwLock::new(None),
        owner_thread: RwLock::new(None),
        next_request_id: AtomicU64::new(0),
        metrics,
    });

    let bus = RequestBus {
        tx,
        shared: Arc::clone(&shared),
    };
    let owner = OwnerLoop { rx, shared };

    (bus, owner)
}

/// Worker-side handle to the bus.
///
/// Cheap to clone; every worker thread gets its own copy.
#[derive(Clone)]
pub struct RequestBus {
    tx: mpsc::Sender<Envelope>,
    shared: Arc<BusShared>,
}

impl RequestBus {
    /// Send a request and block until the owner replies.
    ///
    /// Callable from any thread. Three paths:
    /// - calling thread is the owner thread: the handler runs synchronously
    ///   in place, nothing is queued
    /// - no handler registered yet: returns [`Response::NoHandler`] at once
    /// - otherwise: enqueue, park on the reply slot until the owner loop
    ///   serves the request
    ///
    /// Self-call detection starts once the owner loop has run or pumped at
    /// least once (or [`OwnerLoop::bind_current_thread`] was called); before
    /// that there is no owner thread to detect.
    pub fn call(&self, request: Request) -> Response {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;

        if self.is_owner_thread() {
            tracing::trace!(id, tag = request.tag(), "serving bus request in place on owner thread");
            self.shared.metrics.record_self_call();
            return dispatch(&self.shared, id, &request);
        }

        if self.shared.handler.read().unwrap().is_none() {
            tracing::warn!(
                tag = request.tag(),
                "bus call before any owner handler was registered"
            );
            self.shared.metrics.record_no_handler();
            return Response::NoHandler;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            id,
            request,
            reply: reply_tx,
        };

        if self.tx.blocking_send(envelope).is_err() {
            tracing::warn!(id, "owner loop is gone; bus request dropped");
            self.shared.metrics.record_no_handler();
            return Response::NoHandler;
        }
        self.shared.metrics.record_enqueued();

        match reply_rx.blocking_recv() {
            Ok(response) => response,
            Err(_) => {
                // The owner loop dropped the slot without replying (it shut
                // down mid-request). Surface as a protocol error.
                tracing::warn!(id, "reply slot closed before a response was produced");
                self.shared.metrics.record_dropped_reply();
                Response::ProtocolError
            }
        }
    }

    /// Traffic counters shared with the owner loop.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    fn is_owner_thread(&self) -> bool {
        self.shared
            .owner_thread
            .read()
            .unwrap()
            .is_some_and(|id| id == thread::current().id())
    }
}

/// Owner-side consumer of the request queue.
///
/// Exactly one exists per bus. The thread that calls [`run`](Self::run) or
/// [`pump`](Self::pump) becomes the owner thread.
pub struct OwnerLoop {
    rx: mpsc::Receiver<Envelope>,
    shared: Arc<BusShared>,
}

impl OwnerLoop {
    /// Install the single function that decides replies.
    ///
    /// Replaces any previously registered handler; requests dispatched after
    /// this call see the new one.
    pub fn register_handler<H>(&self, handler: H)
    where
        H: OwnerHandler + 'static,
    {
        *self.shared.handler.write().unwrap() = Some(Arc::new(handler));
        tracing::debug!("owner handler registered");
    }

    /// Declare the calling thread as the owner thread without serving yet.
    ///
    /// [`run`](Self::run) and [`pump`](Self::pump) do this implicitly; call
    /// it explicitly when the owner thread may issue bus calls before its
    /// event loop starts pumping.
    pub fn bind_current_thread(&self) {
        *self.shared.owner_thread.write().unwrap() = Some(thread::current().id());
    }

    /// Serve requests until every [`RequestBus`] handle has been dropped.
    ///
    /// Blocks the calling thread; this is the standalone event loop for
    /// hosts that dedicate a thread to the bus.
    pub fn run(mut self) {
        self.bind_current_thread();
        tracing::debug!("owner loop started");

        while let Some(envelope) = self.rx.blocking_recv() {
            self.serve(envelope);
        }

        tracing::debug!("owner loop terminated: all bus handles dropped");
    }

    /// Serve every request currently queued, without blocking.
    ///
    /// For hosts that embed the bus into an existing UI event loop: call this
    /// from an idle/timer callback on the owner thread. Returns the number of
    /// requests served.
    pub fn pump(&mut self) -> usize {
        self.bind_current_thread();

        let mut served = 0;
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    self.serve(envelope);
                    served += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        served
    }

    fn serve(&self, envelope: Envelope) {
        let response = dispatch(&self.shared, envelope.id, &envelope.request);
        if envelope.reply.send(response).is_err() {
            // Requester stopped waiting (its thread died); nothing to do.
            tracing::warn!(id = envelope.id, "requester gone before reply delivery");
            self.shared.metrics.record_dropped_reply();
        }
    }
}

/// Invoke the registered handler for one request.
fn dispatch(shared: &BusShared, id: u64, request: &Request) -> Response {
    let handler = shared.handler.read().unwrap().clone();
    match handler {
        Some(handler) => {
            let response = handler.handle(request);
            shared.metrics.record_served();
            tracing::trace!(id, tag = request.tag(), response = ?response, "bus request served");
            response
        }
        None => {
            tracing::warn!(id, tag = request.tag(), "no owner handler registered");
            shared.metrics.record_no_handler();
            Response::NoHandler
        }
    }
}
