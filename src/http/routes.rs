//! Built-in routes and the hook for application routes.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::config::schema::Mode;
use crate::database::DatabaseHandle;
use crate::http::middleware::TenantDb;
use crate::http::server::AppState;
use crate::lifecycle::LifecyclePhase;

/// Adds application routes to the server router.
///
/// Registered routes run behind the tenant middleware and can extract [`TenantDb`].
pub type RouteRegistrar = Arc<dyn Fn(Router<AppState>) -> Router<AppState> + Send + Sync>;

/// Routes every instance serves.
pub fn core_routes(mode: Mode) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/db", get(db_info))
        .route("/api/v1/db/ping", get(db_ping));

    if mode == Mode::Dev {
        router.route("/monitor/registry", get(registry_monitor))
    } else {
        router
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    phase: String,
    registry_version: u64,
}

async fn health(State(state): State<AppState>) -> Response {
    let phase = state.phase.current();
    let serving = phase == LifecyclePhase::Serving;
    let body = HealthBody {
        status: if serving { "ok" } else { "unavailable" },
        phase: phase.to_string(),
        registry_version: state.registry.version(),
    };
    let status = if serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

#[derive(Serialize)]
struct DbInfo {
    tenant: Option<String>,
    database: String,
    dialect: &'static str,
    dsn: String,
    default: bool,
    registry_version: u64,
}

async fn db_info(State(state): State<AppState>, tenant: TenantDb) -> Json<DbInfo> {
    Json(DbInfo {
        tenant: tenant.key.as_ref().map(ToString::to_string),
        database: tenant.handle.name().to_string(),
        dialect: tenant.handle.dialect().as_str(),
        dsn: tenant.handle.dsn().to_string(),
        default: tenant.is_default(),
        registry_version: state.registry.version(),
    })
}

#[derive(Serialize)]
struct PingBody {
    database: String,
    reachable: bool,
    latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn db_ping(tenant: TenantDb) -> Response {
    let started = Instant::now();
    let result = tenant.handle.ping().await;
    let body = PingBody {
        database: tenant.handle.name().to_string(),
        reachable: result.is_ok(),
        latency_ms: started.elapsed().as_millis(),
        error: result.as_ref().err().map(ToString::to_string),
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            tracing::warn!(database = %tenant.handle.name(), error = %err, "Ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

#[derive(Serialize)]
struct PoolView {
    name: String,
    dialect: &'static str,
    dsn: String,
    size: u32,
    idle: usize,
    closed: bool,
}

#[derive(Serialize)]
struct RegistryView {
    version: u64,
    default: PoolView,
    tenants: Vec<PoolView>,
    retiring: Vec<u64>,
    in_flight: u64,
}

async fn registry_monitor(State(state): State<AppState>) -> Json<RegistryView> {
    let snapshot = state.registry.snapshot();
    let mut tenants: Vec<PoolView> = snapshot
        .tenants()
        .map(|(_, handle)| pool_view(handle))
        .collect();
    tenants.sort_by(|a, b| a.name.cmp(&b.name));

    Json(RegistryView {
        version: snapshot.version(),
        default: pool_view(snapshot.default_handle()),
        tenants,
        retiring: state.registry.retiring_versions(),
        in_flight: state.in_flight.count(),
    })
}

fn pool_view(handle: &DatabaseHandle) -> PoolView {
    PoolView {
        name: handle.name().to_string(),
        dialect: handle.dialect().as_str(),
        dsn: handle.dsn().to_string(),
        size: handle.size(),
        idle: handle.num_idle(),
        closed: handle.is_closed(),
    }
}
