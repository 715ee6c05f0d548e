//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ConfigDocument (validated, versioned, immutable)
//!
//! On change (file event or SIGHUP):
//!     watcher.rs debounces
//!     → ConfigStore::load (next version)
//!     → Registry::rebuild → Registry::publish
//!     → ConfigStore::commit
//! ```
//!
//! # Design Decisions
//! - A document is immutable once loaded; changes require a full reload
//! - All sections have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError, ConfigStore};
pub use schema::{
    ApplicationConfig, ConfigDocument, DatabaseConfig, Dialect, JobsConfig, LoggerConfig,
    MetricsConfig, Mode, ReloadConfig, ShutdownConfig, SslConfig, WatchMode,
};
pub use validation::ValidationError;
pub use watcher::{ConfigWatcher, ReloadHandle, WatcherState};
