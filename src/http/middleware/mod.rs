//! Request middleware.

pub mod in_flight;
pub mod tenant;

pub use in_flight::track_in_flight;
pub use tenant::{resolve_tenant, TenantDb};
