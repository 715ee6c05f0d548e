//! Background job subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle
//!     → JobScheduler::register (before start)
//!     → JobScheduler::start(registry): one task per job, ticking on its interval
//!     → Job::run(JobContext) reads the active registry snapshot
//!     → JobScheduler::stop: cancel, wait up to job_timeout, abandon stragglers
//! ```

use thiserror::Error;

pub mod health;
pub mod scheduler;

pub use health::DatabaseProbeJob;
pub use scheduler::{Job, JobContext, JobScheduler};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}
