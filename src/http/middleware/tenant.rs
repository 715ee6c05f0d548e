//! Tenant resolution middleware.
//! Maps the request host to a database handle from the active registry snapshot.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::database::{DatabaseHandle, TenantKey};
use crate::http::server::AppState;

/// Database selected for the current request.
///
/// Handlers hold the handle for as long as they need it; a registry swap
/// mid-request does not affect them.
#[derive(Clone, Debug)]
pub struct TenantDb {
    /// Normalized request host, if the request carried one.
    pub key: Option<TenantKey>,
    pub handle: Arc<DatabaseHandle>,
}

impl TenantDb {
    /// True if the request fell through to the default database.
    pub fn is_default(&self) -> bool {
        self.handle.name() == crate::database::DEFAULT_DATABASE
    }
}

pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let key = request_host(&req).and_then(TenantKey::from_host);
    let handle = state.registry.resolve(key.as_ref());

    tracing::debug!(
        tenant = key.as_ref().map(TenantKey::as_str).unwrap_or("-"),
        database = %handle.name(),
        "Tenant resolved"
    );

    req.extensions_mut().insert(TenantDb { key, handle });
    next.run(req).await
}

/// `Host` header, or the URI authority (HTTP/2 `:authority`).
fn request_host(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().authority().map(|authority| authority.as_str()))
}

impl<S> FromRequestParts<S> for TenantDb
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantDb>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "tenant database not resolved"))
    }
}
