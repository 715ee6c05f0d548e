//! Host-keyed database registry with hot reload and graceful lifecycle orchestration.
//!
//! Every HTTP request is served against the database configured for its `Host`,
//! falling back to a default. Configuration changes, including the set of tenant
//! databases, are applied without a restart, and shutdown drains requests before
//! stopping background jobs and closing connection pools.

// Core subsystems
pub mod config;
pub mod database;
pub mod http;
pub mod net;

// Background work
pub mod jobs;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ConfigDocument;
pub use database::{DatabaseHandle, Registry, TenantKey};
pub use http::{HttpServer, RouteRegistrar, TenantDb};
pub use lifecycle::{Lifecycle, LifecycleError, RunningApp, Shutdown};
