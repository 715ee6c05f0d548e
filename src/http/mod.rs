//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, timeout, tracing)
//!     → middleware/in_flight.rs (drain accounting)
//!     → middleware/tenant.rs (Host → TenantKey → DatabaseHandle)
//!     → routes.rs or a registered application route (extracts TenantDb)
//!     → Send to client
//! ```

pub mod middleware;
pub mod routes;
pub mod server;

pub use middleware::TenantDb;
pub use routes::RouteRegistrar;
pub use server::{AppState, HttpServer};
