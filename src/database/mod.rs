//! Tenant database subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigDocument ([database] + [databases."host"])
//!     → handle.rs (open pool per entry, dialect factory, ping)
//!     → registry.rs (RegistrySnapshot: TenantKey → handle, plus default)
//!     → Registry::publish (atomic swap, old snapshot retired after grace)
//!
//! Per request:
//!     Host header → tenant.rs (TenantKey) → Registry::resolve → handle
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; a config change builds a new one wholesale
//! - Resolve is a single atomic load and never returns nothing
//! - Fail closed: a snapshot that cannot be fully built is never published

pub mod handle;
pub mod registry;
pub mod tenant;

pub use crate::config::schema::Dialect;
pub use handle::{BuildError, DatabaseHandle, DbPool};
pub use registry::{Registry, RegistrySnapshot, DEFAULT_DATABASE};
pub use tenant::TenantKey;
