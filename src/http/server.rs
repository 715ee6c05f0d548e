//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router from the built-in routes and registered application routes
//! - Wire up middleware (tenant resolution, in-flight tracking, timeout, request ID, tracing)
//! - Serve plain HTTP or TLS on an already bound listener
//! - Stop accepting on shutdown and let in-flight requests finish
//!
//! # Design Decisions
//! - Plain HTTP and TLS both run on `axum-server` so one [`Handle`] drives the drain
//! - Draining has no deadline of its own; the owner of the handle forces the close

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::{ConfigDocument, Mode};
use crate::database::Registry;
use crate::http::middleware::{resolve_tenant, track_in_flight};
use crate::http::routes::{core_routes, RouteRegistrar};
use crate::lifecycle::PhaseTracker;
use crate::net::InFlightTracker;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub phase: Arc<PhaseTracker>,
    pub in_flight: InFlightTracker,
    pub mode: Mode,
}

/// HTTP server for tenant requests.
pub struct HttpServer {
    router: Router,
    tls: Option<RustlsConfig>,
    handle: Handle,
}

impl HttpServer {
    pub fn new(
        config: &ConfigDocument,
        state: AppState,
        registrars: &[RouteRegistrar],
        tls: Option<RustlsConfig>,
    ) -> Self {
        let router = Self::build_router(config, state, registrars);
        Self {
            router,
            tls,
            handle: Handle::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ConfigDocument, state: AppState, registrars: &[RouteRegistrar]) -> Router {
        let routes = registrars
            .iter()
            .fold(core_routes(config.application.mode), |router, register| register(router));

        routes
            .layer(middleware::from_fn_with_state(state.clone(), resolve_tenant))
            .layer(middleware::from_fn_with_state(state.clone(), track_in_flight))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.application.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Control handle for the running server.
    ///
    /// `graceful_shutdown(None)` stops accepting and lets open requests finish;
    /// `shutdown()` drops every connection that is still open.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Serve until the handle shuts the server down.
    ///
    /// Completes once every connection has finished or been dropped.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let listener = listener.into_std()?;
        let service = self.router.into_make_service();

        match self.tls {
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum_server::from_tcp(listener)
                    .handle(self.handle)
                    .serve(service)
                    .await?;
            }
            Some(tls) => {
                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::from_tcp_rustls(listener, tls)
                    .handle(self.handle)
                    .serve(service)
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
