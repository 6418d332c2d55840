// taskbridge - Worker-to-owner thread coordination
//
// This is the library crate containing the coordination layer used by desktop
// tools that run long background operations: cooperative cancellation for
// worker-side code, and a synchronous request/response bus that lets any
// worker thread call into the single owner (UI) thread.

pub mod bus;
pub mod cancel;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod progress;

// Re-export commonly used types for convenience
pub use bus::{
    MessageColor, OwnerHandler, OwnerLoop, Request, RequestBus, Response, SessionToken,
    UserDecision,
};
pub use cancel::{
    AbortReturn, CancelScope, Interrupted, Outcome, StopFlag, StopProbe, run_monitored,
};
pub use config::{ConfigManager, Settings};
pub use metrics::Metrics;
pub use progress::{GaugeController, GaugeSink, ProgressClient, ProgressHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
