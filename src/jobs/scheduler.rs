//! Periodic job runner with cooperative cancellation.
//!
//! # Responsibilities
//! - Keep the set of registered jobs until the scheduler starts
//! - Run each job on its own interval in its own task
//! - Cancel on stop and abandon jobs that ignore cancellation for too long
//!
//! # Design Decisions
//! - Runs of one job never overlap; a slow run delays the next tick
//! - Missed ticks are skipped, not replayed
//! - A failing run is logged and counted; the job keeps its schedule

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::schema::JobsConfig;
use crate::database::Registry;
use crate::jobs::JobError;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;

/// A periodic background task.
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Time between the end of one tick and the next.
    fn interval(&self) -> Duration;

    /// Run once. Long runs should watch [`JobContext::cancelled`].
    fn run(&self, ctx: JobContext) -> BoxFuture<'static, Result<(), JobError>>;
}

/// What a job run gets to work with.
#[derive(Clone)]
pub struct JobContext {
    registry: Arc<Registry>,
    cancel: ShutdownSignal,
}

impl JobContext {
    pub fn new(registry: Arc<Registry>, cancel: ShutdownSignal) -> Self {
        Self { registry, cancel }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_triggered()
    }

    /// Resolves when the scheduler is stopping.
    pub async fn cancelled(&mut self) {
        self.cancel.recv().await
    }
}

struct RunningJob {
    name: String,
    task: JoinHandle<()>,
}

pub struct JobScheduler {
    config: JobsConfig,
    jobs: Vec<Arc<dyn Job>>,
    running: Vec<RunningJob>,
    cancel: Shutdown,
}

impl JobScheduler {
    pub fn new(config: JobsConfig) -> Self {
        Self {
            config,
            jobs: Vec::new(),
            running: Vec::new(),
            cancel: Shutdown::new(),
        }
    }

    /// Add a job. Jobs registered after [`start`](Self::start) are not run.
    pub fn register<J: Job>(&mut self, job: J) {
        self.register_arc(Arc::new(job));
    }

    pub fn register_arc(&mut self, job: Arc<dyn Job>) {
        tracing::debug!(job = %job.name(), interval = ?job.interval(), "Job registered");
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.name().to_string()).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Spawn one task per registered job.
    pub fn start(&mut self, registry: Arc<Registry>) {
        if !self.config.enabled {
            tracing::info!(jobs = self.jobs.len(), "Job scheduler disabled");
            return;
        }

        for job in self.jobs.drain(..) {
            if job.interval().is_zero() {
                tracing::warn!(job = %job.name(), "Job has a zero interval, not scheduling");
                continue;
            }
            let name = job.name().to_string();
            let task = tokio::spawn(run_job(job, Arc::clone(&registry), self.cancel.subscribe()));
            self.running.push(RunningJob { name, task });
        }

        tracing::info!(jobs = self.running.len(), "Job scheduler started");
    }

    /// Cancel every job and wait for all of them, up to one shared `job_timeout`.
    ///
    /// Returns the names of the jobs that had to be abandoned.
    pub async fn stop(&mut self) -> Vec<String> {
        self.cancel.trigger();

        let timeout = self.config.job_timeout();
        let deadline = Instant::now() + timeout;
        let mut abandoned = Vec::new();
        for RunningJob { name, mut task } in self.running.drain(..) {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(job = %name, error = %err, "Job task ended abnormally");
                }
                Err(_) => {
                    task.abort();
                    tracing::warn!(job = %name, timeout = ?timeout, "Job did not stop in time, abandoned");
                    abandoned.push(name);
                }
            }
        }

        tracing::info!(abandoned = abandoned.len(), "Job scheduler stopped");
        abandoned
    }
}

async fn run_job(job: Arc<dyn Job>, registry: Arc<Registry>, mut cancel: ShutdownSignal) {
    let interval = job.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.recv() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_triggered() {
            break;
        }

        let ctx = JobContext::new(Arc::clone(&registry), cancel.clone());
        let started = Instant::now();
        match job.run(ctx).await {
            Ok(()) => {
                metrics::record_job_run(job.name(), "success");
                tracing::debug!(job = %job.name(), elapsed = ?started.elapsed(), "Job run finished");
            }
            Err(JobError::Cancelled) => {
                metrics::record_job_run(job.name(), "cancelled");
                break;
            }
            Err(err) => {
                metrics::record_job_run(job.name(), "failure");
                tracing::warn!(job = %job.name(), error = %err, "Job run failed");
            }
        }
    }

    tracing::debug!(job = %job.name(), "Job stopped");
}
