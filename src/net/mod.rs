//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ApplicationConfig
//!     → listener.rs (bind before the server task starts)
//!     → tls.rs (optional rustls config from PEM files)
//!     → HTTP server
//!     → connection.rs (in-flight tracking for the drain deadline)
//! ```

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{InFlightGuard, InFlightTracker};
pub use listener::{bind, ListenError};
pub use tls::load_tls_config;
