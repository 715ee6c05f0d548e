//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber once per process
//! - Route events to stdout and, optionally, to per-concern log files
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured level
//! - File sinks: `bus.log` (everything), `job.log` (scheduler), `request.log` (HTTP)

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::schema::{LoggerConfig, Mode};

/// Targets that go to `job.log`.
pub const JOB_TARGET: &str = "hostdb::jobs";

/// Targets that go to `request.log`.
pub const REQUEST_TARGETS: [&str; 2] = ["hostdb::http", "tower_http"];

static INSTALLED: Mutex<bool> = Mutex::new(false);

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install log subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;
type FileLayer = fmt::Layer<Registry, fmt::format::DefaultFields, fmt::format::Format, Arc<File>>;

/// Install the global subscriber. Later calls in the same process are no-ops.
pub fn init_logging(config: &LoggerConfig, mode: Mode) -> Result<(), LoggingError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hostdb={0},tower_http={0}", config.level)));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.stdout {
        layers.push(match mode {
            Mode::Prod => fmt::layer().json().boxed(),
            Mode::Dev | Mode::Test => fmt::layer().with_target(true).boxed(),
        });
    }

    if config.file {
        let dir = Path::new(&config.path);
        fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        layers.push(file_layer(&dir.join("bus.log"))?.boxed());
        layers.push(
            file_layer(&dir.join("job.log"))?
                .with_filter(filter_fn(|meta| meta.target().starts_with(JOB_TARGET)))
                .boxed(),
        );
        layers.push(
            file_layer(&dir.join("request.log"))?
                .with_filter(filter_fn(|meta| {
                    REQUEST_TARGETS
                        .iter()
                        .any(|target| meta.target().starts_with(target))
                }))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    *installed = true;

    tracing::debug!(
        level = %config.level,
        stdout = config.stdout,
        file = config.file,
        path = %config.path,
        "Logging initialized"
    );
    Ok(())
}

fn file_layer(path: &Path) -> Result<FileLayer, LoggingError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
}
