//! Configuration file watcher for hot reload.
//!
//! # Responsibilities
//! - Detect changes to the configuration file (OS notifications or polling)
//! - Debounce bursts of filesystem events into one reload
//! - Reload, rebuild the registry snapshot and publish it
//!
//! # State Transitions
//! ```text
//! Idle/Polling → ChangeDetected → Rebuilding → Published → Idle/Polling
//!                      ↓                ↓
//!             (load failed or     (build failed)
//!              topology same)           ↓
//!                      └────────→ Idle/Polling
//! ```
//!
//! # Design Decisions
//! - The parent directory is watched so that rename-replace saves are seen
//! - One task applies every change, so it is the registry's only writer
//! - Failures keep the previous document and snapshot

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::loader::{ConfigError, ConfigStore};
use crate::config::schema::{ReloadConfig, WatchMode};
use crate::database::Registry;
use crate::lifecycle::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Waiting for OS notifications.
    Idle,
    /// Waiting for the next poll to notice a change.
    Polling,
    ChangeDetected,
    Rebuilding,
    Published,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Idle => "idle",
            WatcherState::Polling => "polling",
            WatcherState::ChangeDetected => "change_detected",
            WatcherState::Rebuilding => "rebuilding",
            WatcherState::Published => "published",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    FileChanged,
    Manual,
}

/// Requests a reload without a filesystem change.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl ReloadHandle {
    /// Ask the watcher to reload. Ignored once the watcher has stopped.
    pub fn request_reload(&self) {
        let _ = self.tx.send(Trigger::Manual);
    }
}

/// Watches the configuration file and republishes the registry on change.
pub struct ConfigWatcher {
    store: Arc<ConfigStore>,
    config: ReloadConfig,
    tx: mpsc::UnboundedSender<Trigger>,
    rx: mpsc::UnboundedReceiver<Trigger>,
    state: watch::Sender<WatcherState>,
}

impl ConfigWatcher {
    pub fn new(store: Arc<ConfigStore>, config: &ReloadConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(resting_state(config));
        Self {
            store,
            config: config.clone(),
            tx,
            rx,
            state,
        }
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle {
            tx: self.tx.clone(),
        }
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Start watching and spawn the reload task.
    ///
    /// With `reload.enabled = false` no filesystem watch is set up, but
    /// manual reloads through a [`ReloadHandle`] still work.
    pub fn start(
        self,
        registry: Arc<Registry>,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, ConfigError> {
        let fs_watcher = if self.config.enabled {
            Some(self.watch_file()?)
        } else {
            None
        };

        tracing::info!(
            path = %self.store.path().display(),
            enabled = self.config.enabled,
            mode = ?self.config.watch,
            debounce = ?self.config.debounce(),
            "Config watcher started"
        );

        let ConfigWatcher {
            store,
            config,
            tx,
            rx,
            state,
        } = self;
        drop(tx);

        let worker = ReloadWorker {
            store,
            registry,
            debounce: config.debounce(),
            resting: resting_state(&config),
            state,
        };

        Ok(tokio::spawn(async move {
            // Dropping the watcher stops OS notifications.
            let _fs_watcher = fs_watcher;
            worker.run(rx, shutdown).await;
        }))
    }

    fn watch_file(&self) -> Result<Box<dyn Watcher + Send>, ConfigError> {
        let path = self.store.path().to_path_buf();
        let dir = watch_dir(&path);
        let file_name = path.file_name().map(ToOwned::to_owned);
        let tx = self.tx.clone();

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(ToOwned::to_owned) == file_name);
                if ours {
                    let _ = tx.send(Trigger::FileChanged);
                }
            }
            Err(err) => tracing::error!(error = %err, "Config watch error"),
        };

        let watch_err = |source| ConfigError::Watch {
            path: path.clone(),
            source,
        };

        let mut watcher: Box<dyn Watcher + Send> = match self.config.watch {
            WatchMode::Notify => Box::new(
                RecommendedWatcher::new(handler, notify::Config::default()).map_err(watch_err)?,
            ),
            WatchMode::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(self.config.poll_interval()),
                )
                .map_err(watch_err)?,
            ),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;
        Ok(watcher)
    }
}

fn resting_state(config: &ReloadConfig) -> WatcherState {
    match config.watch {
        WatchMode::Poll if config.enabled => WatcherState::Polling,
        _ => WatcherState::Idle,
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct ReloadWorker {
    store: Arc<ConfigStore>,
    registry: Arc<Registry>,
    debounce: Duration,
    resting: WatcherState,
    state: watch::Sender<WatcherState>,
}

impl ReloadWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Trigger>, mut shutdown: ShutdownSignal) {
        let mut last_dispatch: Option<Instant> = None;

        loop {
            self.enter(self.resting);

            let trigger = tokio::select! {
                _ = shutdown.recv() => break,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            self.enter(WatcherState::ChangeDetected);
            tracing::debug!(trigger = ?trigger, "Configuration change detected");

            // Quiet period: wait until no event arrived for a full debounce window.
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return self.stopped(),
                    more = tokio::time::timeout(self.debounce, rx.recv()) => match more {
                        Ok(Some(_)) => continue,
                        Ok(None) | Err(_) => break,
                    },
                }
            }

            if let Some(last) = last_dispatch {
                let earliest = last + self.debounce;
                tokio::select! {
                    _ = shutdown.recv() => return self.stopped(),
                    _ = tokio::time::sleep_until(earliest) => {}
                }
            }

            self.apply().await;
            last_dispatch = Some(Instant::now());
        }

        self.stopped();
    }

    async fn apply(&self) {
        let doc = match self.store.load() {
            Ok(doc) => doc,
            Err(err) => {
                tracing::error!(error = %err, "Configuration reload failed, keeping current configuration");
                return;
            }
        };

        let current = self.store.current();
        if current.listener_changed(&doc) {
            tracing::warn!(
                version = doc.version,
                "Listener or TLS settings changed; they take effect after a restart"
            );
        }
        if current.same_topology(&doc) {
            tracing::info!(version = doc.version, "Database topology unchanged, skipping rebuild");
            self.store.commit(doc);
            return;
        }

        self.enter(WatcherState::Rebuilding);
        match self.registry.rebuild(&doc).await {
            Ok(snapshot) => {
                self.registry.publish(snapshot);
                self.store.commit(doc);
                self.enter(WatcherState::Published);
            }
            Err(err) => {
                tracing::error!(
                    version = doc.version,
                    active = self.registry.version(),
                    error = %err,
                    "Registry rebuild failed, keeping active snapshot"
                );
            }
        }
    }

    fn enter(&self, state: WatcherState) {
        self.state.send_replace(state);
    }

    fn stopped(&self) {
        tracing::info!("Config watcher stopped");
    }
}
