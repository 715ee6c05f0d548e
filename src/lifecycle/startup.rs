//! Startup and shutdown orchestration.
//!
//! # Responsibilities
//! - Load configuration, initialize logging and build the first registry snapshot
//! - Bind the listener and start the HTTP server, job scheduler and config watcher
//! - Shut everything down in reverse order with a bounded drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and releases what was already acquired
//! - Subsystems initialize in order, not concurrently
//! - The listener is bound before any background work starts
//! - A missed drain deadline is reported, but cleanup still runs to completion

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ConfigDocument, ConfigStore, ConfigWatcher, ReloadHandle};
use crate::database::Registry;
use crate::http::{AppState, HttpServer, RouteRegistrar};
use crate::jobs::{DatabaseProbeJob, Job, JobScheduler};
use crate::lifecycle::phase::{LifecyclePhase, PhaseTracker};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::{signals, LifecycleError};
use crate::net::{self, InFlightTracker};
use crate::observability::{logging, metrics};

/// Upper bound for joining the watcher and signal tasks.
const BACKGROUND_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the server task to exit once connections are dropped.
const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a clean shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub elapsed: Duration,
    /// Jobs that ignored cancellation past `jobs.job_timeout_ms`.
    pub abandoned_jobs: Vec<String>,
}

/// Builder for a server process.
pub struct Lifecycle {
    config_path: PathBuf,
    registrars: Vec<RouteRegistrar>,
    jobs: Vec<Arc<dyn Job>>,
}

impl Lifecycle {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            registrars: Vec::new(),
            jobs: Vec::new(),
        }
    }

    /// Add application routes.
    pub fn with_routes(mut self, registrar: RouteRegistrar) -> Self {
        self.registrars.push(registrar);
        self
    }

    /// Add a background job, started after the HTTP listener.
    pub fn with_job<J: Job>(mut self, job: J) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    /// Run the startup sequence.
    ///
    /// On error everything acquired so far has been released again.
    pub async fn start(self) -> Result<RunningApp, LifecycleError> {
        let phase = Arc::new(PhaseTracker::new());

        let store = Arc::new(ConfigStore::open(&self.config_path)?);
        let doc = store.current();
        phase.advance(LifecyclePhase::ConfigLoaded)?;

        logging::init_logging(&doc.logger, doc.application.mode)?;
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            config = %store.path().display(),
            mode = %doc.application.mode,
            "hostdb starting"
        );

        let registry = Arc::new(Registry::bootstrap(&doc).await?);
        phase.advance(LifecyclePhase::DatabaseReady)?;

        let server = match self.bind_server(&doc, &registry, &phase).await {
            Ok(server) => server,
            Err(err) => {
                tracing::error!(error = %err, "Startup failed");
                registry.release_all().await;
                let _ = phase.advance(LifecyclePhase::Stopped);
                return Err(err);
            }
        };
        let (local_addr, http, server_task, in_flight) = server;
        phase.advance(LifecyclePhase::Serving)?;

        let mut app = RunningApp {
            local_addr,
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            phase,
            in_flight,
            grace: doc.shutdown.grace(),
            stop: Shutdown::new(),
            http,
            server: Some(server_task),
            scheduler: JobScheduler::new(doc.jobs.clone()),
            watcher_shutdown: Shutdown::new(),
            background: Vec::new(),
            reload: None,
        };

        if doc.jobs.probe_interval_secs > 0 {
            app.scheduler.register(DatabaseProbeJob::new(Duration::from_secs(
                doc.jobs.probe_interval_secs,
            )));
        }
        for job in self.jobs {
            app.scheduler.register_arc(job);
        }
        app.scheduler.start(Arc::clone(&registry));

        if let Err(err) = app.start_watcher(&doc) {
            tracing::error!(error = %err, "Startup failed");
            let _ = app.shutdown().await;
            return Err(err);
        }

        tracing::info!(address = %local_addr, version = doc.version, "hostdb serving");
        Ok(app)
    }

    /// TLS, listener, metrics exporter and the HTTP server task.
    ///
    /// The exporter is installed last among the fallible steps; once running
    /// it lives for the rest of the process.
    async fn bind_server(
        &self,
        doc: &ConfigDocument,
        registry: &Arc<Registry>,
        phase: &Arc<PhaseTracker>,
    ) -> Result<(SocketAddr, Handle, JoinHandle<std::io::Result<()>>, InFlightTracker), LifecycleError>
    {
        let tls = if doc.ssl.enable {
            Some(
                net::load_tls_config(&doc.ssl)
                    .await
                    .map_err(LifecycleError::Tls)?,
            )
        } else {
            None
        };

        let listener = net::bind(&doc.application).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| LifecycleError::Server(err.to_string()))?;

        if doc.metrics.enabled {
            match doc.metrics.address.parse() {
                Ok(addr) => metrics::init_metrics(addr)?,
                Err(_) => tracing::error!(
                    metrics_address = %doc.metrics.address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let in_flight = InFlightTracker::new();
        let state = AppState {
            registry: Arc::clone(registry),
            phase: Arc::clone(phase),
            in_flight: in_flight.clone(),
            mode: doc.application.mode,
        };
        let server = HttpServer::new(doc, state, &self.registrars, tls);
        let http = server.handle();
        let task = tokio::spawn(server.run(listener));

        Ok((local_addr, http, task, in_flight))
    }
}

/// A started server process.
pub struct RunningApp {
    local_addr: SocketAddr,
    store: Arc<ConfigStore>,
    registry: Arc<Registry>,
    phase: Arc<PhaseTracker>,
    in_flight: InFlightTracker,
    grace: Duration,
    stop: Shutdown,
    http: Handle,
    server: Option<JoinHandle<std::io::Result<()>>>,
    scheduler: JobScheduler,
    watcher_shutdown: Shutdown,
    background: Vec<JoinHandle<()>>,
    reload: Option<ReloadHandle>,
}

impl RunningApp {
    fn start_watcher(&mut self, doc: &ConfigDocument) -> Result<(), LifecycleError> {
        let watcher = ConfigWatcher::new(Arc::clone(&self.store), &doc.reload);
        let reload = watcher.reload_handle();

        let hangup = signals::spawn_reload_on_hangup(reload.clone(), self.watcher_shutdown.subscribe())
            .map_err(LifecycleError::Signal)?;
        self.background.push(hangup);

        let task = watcher.start(Arc::clone(&self.registry), self.watcher_shutdown.subscribe())?;
        self.background.push(task);
        self.reload = Some(reload);
        Ok(())
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase.current()
    }

    /// The last applied configuration.
    pub fn config(&self) -> Arc<ConfigDocument> {
        self.store.current()
    }

    /// Requests currently being handled.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.count()
    }

    /// Trigger that makes [`run_until_signal`](Self::run_until_signal) shut down.
    pub fn stop_handle(&self) -> Shutdown {
        self.stop.clone()
    }

    pub fn reload_handle(&self) -> Option<ReloadHandle> {
        self.reload.clone()
    }

    /// Serve until SIGINT/SIGTERM, a stop request, or an unexpected server exit,
    /// then shut down.
    pub async fn run_until_signal(mut self) -> Result<ShutdownReport, LifecycleError> {
        let mut stop = self.stop.subscribe();

        let cause = tokio::select! {
            res = signals::wait_for_interrupt() => res.err().map(LifecycleError::Signal),
            _ = stop.recv() => {
                tracing::info!("Stop requested");
                None
            }
            res = server_exit(&mut self.server) => {
                self.server = None;
                let message = match res {
                    Ok(Ok(())) => "server exited unexpectedly".to_string(),
                    Ok(Err(err)) => err.to_string(),
                    Err(err) => err.to_string(),
                };
                tracing::error!(error = %message, "HTTP server stopped unexpectedly");
                Some(LifecycleError::Server(message))
            }
        };

        let result = self.shutdown().await;
        match cause {
            Some(err) => Err(err),
            None => result,
        }
    }

    /// Stop accepting, drain, stop the scheduler and watcher, release every handle.
    pub async fn shutdown(mut self) -> Result<ShutdownReport, LifecycleError> {
        let started = Instant::now();
        if let Err(err) = self.phase.advance(LifecyclePhase::Draining) {
            tracing::debug!(error = %err, "Shutdown from unexpected phase");
        }
        tracing::info!(grace = ?self.grace, in_flight = self.in_flight.count(), "Shutting down");

        self.http.graceful_shutdown(None);
        let mut timed_out = None;
        if let Some(mut server) = self.server.take() {
            match tokio::time::timeout(self.grace, &mut server).await {
                Ok(Ok(Ok(()))) => tracing::info!("HTTP server drained"),
                Ok(Ok(Err(err))) => tracing::error!(error = %err, "HTTP server failed while draining"),
                Ok(Err(err)) => tracing::error!(error = %err, "HTTP server task failed"),
                Err(_) => {
                    let in_flight = self.in_flight.count();
                    tracing::error!(
                        grace = ?self.grace,
                        in_flight,
                        connections = self.http.connection_count(),
                        "Drain deadline exceeded, closing open connections"
                    );
                    self.http.shutdown();
                    if tokio::time::timeout(FORCE_CLOSE_TIMEOUT, &mut server).await.is_err() {
                        tracing::warn!("HTTP server did not stop after closing connections, aborting");
                        server.abort();
                    }
                    timed_out = Some(in_flight);
                }
            }
        }

        let abandoned_jobs = self.scheduler.stop().await;

        self.watcher_shutdown.trigger();
        for mut task in self.background.drain(..) {
            if tokio::time::timeout(BACKGROUND_JOIN_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("Background task did not stop in time, aborting");
                task.abort();
            }
        }

        self.registry.release_all().await;
        let _ = self.phase.advance(LifecyclePhase::Stopped);

        let elapsed = started.elapsed();
        match timed_out {
            Some(in_flight) => Err(LifecycleError::ShutdownTimeout {
                grace: self.grace,
                in_flight,
            }),
            None => {
                tracing::info!(elapsed = ?elapsed, abandoned_jobs = abandoned_jobs.len(), "Shutdown complete");
                Ok(ShutdownReport {
                    elapsed,
                    abandoned_jobs,
                })
            }
        }
    }
}

async fn server_exit(
    server: &mut Option<JoinHandle<std::io::Result<()>>>,
) -> Result<std::io::Result<()>, tokio::task::JoinError> {
    match server {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
