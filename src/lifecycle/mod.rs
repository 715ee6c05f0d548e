//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Logging → Registry snapshot → Bind listener
//!     → HTTP server task → Job scheduler → Config watcher
//!
//! Shutdown (startup.rs, shutdown.rs):
//!     Signal received → Stop accepting → Drain (bounded by grace)
//!     → Close connections still open → Stop scheduler → Stop watcher
//!     → Release database handles
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: each step completes before the next begins
//! - A failed step releases whatever earlier steps acquired
//! - Shutdown has a deadline; cleanup still runs when it is exceeded

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::database::BuildError;
use crate::net::listener::ListenError;
use crate::observability::logging::LoggingError;

pub mod phase;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use phase::{LifecyclePhase, PhaseTracker};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{Lifecycle, RunningApp, ShutdownReport};

/// Errors that abort startup or mark a shutdown as failed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("database registry: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Listen(#[from] ListenError),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("HTTP server failed: {0}")]
    Server(String),

    #[error("signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("drain deadline of {grace:?} exceeded with {in_flight} request(s) in flight")]
    ShutdownTimeout { grace: Duration, in_flight: u64 },

    #[error("invalid lifecycle transition from {from} to {to}")]
    Phase {
        from: LifecyclePhase,
        to: LifecyclePhase,
    },
}
