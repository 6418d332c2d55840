//! Integration tests for the request/response bus
//!
//! These tests verify that the bus correctly:
//! - Delivers exactly one response per request under concurrency
//! - Never delivers a response to the wrong requester
//! - Serves owner-thread self-calls in place without deadlock
//! - Returns the fixed no-handler reply instead of blocking
//! - Embeds into a host event loop via pump()

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use taskbridge::bus::{self, MessageColor, Request, Response};

/// Handler that echoes a number parsed out of the message text, so every
/// caller can verify it got its own reply and nobody else's.
fn echo_handler(request: &Request) -> Response {
    match request {
        Request::Message { text, .. } => match text.parse::<u64>() {
            Ok(seconds) => Response::Wait { seconds },
            Err(_) => Response::ProtocolError,
        },
        _ => Response::ProtocolError,
    }
}

#[test]
fn test_exactly_one_response_per_concurrent_caller() {
    let (bus, owner) = bus::channel(8);
    owner.register_handler(echo_handler);

    let owner_thread = thread::spawn(move || owner.run());

    let workers: Vec<_> = (0..16u64)
        .map(|i| {
            let bus = bus.clone();
            thread::spawn(move || {
                // Each caller issues a request carrying its own id several
                // times; every reply must carry that id back.
                for _ in 0..25 {
                    let response = bus.call(Request::Message {
                        text: i.to_string(),
                        color: MessageColor::Default,
                        timestamp: false,
                    });
                    assert_eq!(
                        response,
                        Response::Wait { seconds: i },
                        "caller {i} observed a reply that was not its own"
                    );
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let metrics = bus.metrics();
    assert_eq!(metrics.requests_served.load(Ordering::Relaxed), 16 * 25);
    assert_eq!(metrics.dropped_replies.load(Ordering::Relaxed), 0);

    drop(bus);
    owner_thread.join().expect("owner loop panicked");
}

#[test]
fn test_owner_self_call_completes_without_deadlock() {
    let (bus, mut owner) = bus::channel(8);
    owner.register_handler(echo_handler);

    // The owner thread pumps (binding itself), then calls the bus directly.
    // If the self-call were queued this would deadlock: nothing else pumps.
    owner.pump();
    let response = bus.call(Request::Message {
        text: "9".to_string(),
        color: MessageColor::Default,
        timestamp: false,
    });

    assert_eq!(response, Response::Wait { seconds: 9 });
    assert_eq!(bus.metrics().self_calls.load(Ordering::Relaxed), 1);
    // The self-call never touched the queue.
    assert_eq!(bus.metrics().requests_enqueued.load(Ordering::Relaxed), 0);
}

#[test]
fn test_self_call_while_workers_are_queued() {
    let (bus, mut owner) = bus::channel(8);
    owner.register_handler(echo_handler);
    owner.bind_current_thread();

    let worker = {
        let bus = bus.clone();
        thread::spawn(move || {
            bus.call(Request::Message {
                text: "3".to_string(),
                color: MessageColor::Default,
                timestamp: false,
            })
        })
    };

    // Owner interleaves its own call with serving the queued worker.
    let own = bus.call(Request::Message {
        text: "5".to_string(),
        color: MessageColor::Default,
        timestamp: false,
    });
    assert_eq!(own, Response::Wait { seconds: 5 });

    while owner.pump() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(worker.join().unwrap(), Response::Wait { seconds: 3 });
}

#[test]
fn test_call_before_handler_registration_never_blocks() {
    let (bus, _owner) = bus::channel(8);

    let start = std::time::Instant::now();
    let response = bus.call(Request::ReleaseGauge);

    assert_eq!(response, Response::NoHandler);
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "no-handler call should return immediately"
    );
}

#[test]
fn test_owner_loop_exits_when_all_handles_dropped() {
    let (bus, owner) = bus::channel(8);
    owner.register_handler(echo_handler);

    let owner_thread = thread::spawn(move || owner.run());

    let response = bus.call(Request::Message {
        text: "1".to_string(),
        color: MessageColor::Default,
        timestamp: false,
    });
    assert_eq!(response, Response::Wait { seconds: 1 });

    // Dropping the last worker handle shuts the loop down cleanly.
    drop(bus);
    owner_thread.join().expect("owner loop panicked");
}

#[test]
fn test_pump_serves_requests_from_a_host_event_loop() {
    let (bus, mut owner) = bus::channel(8);
    let served = Arc::new(AtomicU64::new(0));

    let served_in_handler = Arc::clone(&served);
    owner.register_handler(move |request: &Request| {
        served_in_handler.fetch_add(1, Ordering::Relaxed);
        match request {
            Request::ReleaseGauge => Response::Ack,
            _ => Response::ProtocolError,
        }
    });

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            thread::spawn(move || bus.call(Request::ReleaseGauge))
        })
        .collect();

    // Simulated host event loop: pump until all workers were answered.
    let mut total = 0;
    while total < 4 {
        total += owner.pump();
        thread::sleep(Duration::from_millis(1));
    }

    for worker in workers {
        assert_eq!(worker.join().unwrap(), Response::Ack);
    }
    assert_eq!(served.load(Ordering::Relaxed), 4);
}
