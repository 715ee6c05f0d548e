//! Database connectivity probe.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};

use crate::database::DatabaseHandle;
use crate::jobs::scheduler::{Job, JobContext};
use crate::jobs::JobError;

/// Pings every handle of the active registry snapshot.
pub struct DatabaseProbeJob {
    interval: Duration,
}

impl DatabaseProbeJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Job for DatabaseProbeJob {
    fn name(&self) -> &str {
        "database_probe"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&self, ctx: JobContext) -> BoxFuture<'static, Result<(), JobError>> {
        Box::pin(async move {
            let snapshot = ctx.registry().snapshot();
            let handles: Vec<Arc<DatabaseHandle>> = snapshot.handles().cloned().collect();

            let results = join_all(handles.iter().map(|handle| handle.ping())).await;

            let mut failed = Vec::new();
            for (handle, result) in handles.iter().zip(results) {
                match result {
                    Ok(()) => tracing::trace!(database = %handle.name(), "Database reachable"),
                    Err(err) => {
                        tracing::warn!(
                            database = %handle.name(),
                            dialect = %handle.dialect(),
                            error = %err,
                            "Database probe failed"
                        );
                        failed.push(handle.name().to_string());
                    }
                }
            }

            if failed.is_empty() {
                tracing::debug!(
                    version = snapshot.version(),
                    databases = handles.len(),
                    "Database probe passed"
                );
                Ok(())
            } else {
                Err(JobError::Failed(format!("unreachable: {}", failed.join(", "))))
            }
        })
    }
}
