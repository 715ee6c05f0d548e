//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hostdb_registry_version` (gauge): config version of the active snapshot
//! - `hostdb_registry_tenants` (gauge): tenant entries in the active snapshot
//! - `hostdb_registry_rebuilds_total` (counter): rebuild attempts by outcome
//! - `hostdb_tenant_resolve_total` (counter): lookups by result (`tenant` or `default`)
//! - `hostdb_http_in_flight` (gauge): requests currently being handled
//! - `hostdb_job_runs_total` (counter): job runs by job and outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_snapshot(version: u64, tenants: usize) {
    gauge!("hostdb_registry_version").set(version as f64);
    gauge!("hostdb_registry_tenants").set(tenants as f64);
}

pub fn record_rebuild(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("hostdb_registry_rebuilds_total", "outcome" => outcome).increment(1);
}

pub fn record_resolve(matched_tenant: bool) {
    let result = if matched_tenant { "tenant" } else { "default" };
    counter!("hostdb_tenant_resolve_total", "result" => result).increment(1);
}

pub fn record_in_flight(count: u64) {
    gauge!("hostdb_http_in_flight").set(count as f64);
}

pub fn record_job_run(job: &str, outcome: &'static str) {
    counter!("hostdb_job_runs_total", "job" => job.to_string(), "outcome" => outcome).increment(1);
}
