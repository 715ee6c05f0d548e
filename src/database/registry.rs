//! Host-keyed registry of database handles.
//!
//! # Responsibilities
//! - Build an immutable snapshot of handles from a configuration document
//! - Resolve a tenant key to a handle without I/O or locking
//! - Swap snapshots atomically and retire the superseded one after a grace period
//!
//! # Design Decisions
//! - One `ArcSwap` holds the active snapshot; the config watcher is its only writer
//! - A failed build leaves the active snapshot untouched and closes what it opened
//! - Retirement is a fixed delay, not reference counting: handles outlive the swap
//!   by `retire_grace`, then close even if something still holds them

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::config::schema::ConfigDocument;
use crate::database::handle::{BuildError, DatabaseHandle};
use crate::database::tenant::TenantKey;
use crate::observability::metrics;

/// Name of the default database entry.
pub const DEFAULT_DATABASE: &str = "*";

/// Upper bound for closing one pool; a pool whose connections never come back is left behind.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable mapping of tenant keys to handles, plus the default.
#[derive(Debug)]
pub struct RegistrySnapshot {
    version: u64,
    default: Arc<DatabaseHandle>,
    tenants: HashMap<TenantKey, Arc<DatabaseHandle>>,
    retire_grace: Duration,
}

impl RegistrySnapshot {
    /// Open every database in `doc` concurrently.
    ///
    /// Fails if the default or any required tenant cannot be opened; in that
    /// case every handle opened along the way is closed again.
    pub async fn build(doc: &ConfigDocument) -> Result<Self, BuildError> {
        let entries: Vec<(&str, _)> = doc
            .databases
            .iter()
            .map(|(name, config)| (name.as_str(), config))
            .collect();

        let (default, opened) = tokio::join!(
            DatabaseHandle::open(DEFAULT_DATABASE, &doc.database),
            join_all(
                entries
                    .iter()
                    .map(|(name, config)| DatabaseHandle::open(name, config)),
            ),
        );

        if let Err(err) = &default {
            tracing::error!(database = DEFAULT_DATABASE, error = %err, "Default database unavailable");
        }
        let mut tenants = HashMap::with_capacity(entries.len());
        let mut failure: Option<BuildError> = None;

        for ((name, config), result) in entries.iter().zip(opened) {
            match result {
                Ok(handle) => match TenantKey::new(name) {
                    Some(key) => {
                        tenants.insert(key, Arc::new(handle));
                    }
                    None => handle.close().await,
                },
                Err(err) if config.required => {
                    tracing::error!(database = %name, error = %err, "Required database unavailable");
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    tracing::warn!(
                        database = %name,
                        error = %err,
                        "Optional database unavailable, tenant falls back to default"
                    );
                }
            }
        }

        let default = match (default, failure) {
            (Ok(default), None) => Arc::new(default),
            (Ok(default), Some(err)) => {
                default.close().await;
                close_all(tenants.values()).await;
                return Err(err);
            }
            (Err(err), _) => {
                close_all(tenants.values()).await;
                return Err(err);
            }
        };

        tracing::info!(
            version = doc.version,
            tenants = tenants.len(),
            default_dialect = %default.dialect(),
            "Registry snapshot built"
        );

        Ok(Self {
            version: doc.version,
            default,
            tenants,
            retire_grace: doc.reload.retire_grace(),
        })
    }

    /// Version of the configuration document this snapshot was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Handle for `key`, or the default.
    ///
    /// An exact match wins; otherwise the key without its port is tried.
    pub fn resolve(&self, key: Option<&TenantKey>) -> &Arc<DatabaseHandle> {
        self.lookup(key).unwrap_or(&self.default)
    }

    fn lookup(&self, key: Option<&TenantKey>) -> Option<&Arc<DatabaseHandle>> {
        let key = key?;
        self.tenants
            .get(key)
            .or_else(|| key.without_port().and_then(|bare| self.tenants.get(&bare)))
    }

    pub fn default_handle(&self) -> &Arc<DatabaseHandle> {
        &self.default
    }

    /// Tenant entries, without the default.
    pub fn tenants(&self) -> impl Iterator<Item = (&TenantKey, &Arc<DatabaseHandle>)> {
        self.tenants.iter()
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    /// Default handle followed by all tenant handles.
    pub fn handles(&self) -> impl Iterator<Item = &Arc<DatabaseHandle>> {
        std::iter::once(&self.default).chain(self.tenants.values())
    }

    pub fn retire_grace(&self) -> Duration {
        self.retire_grace
    }

    /// Close every handle of this snapshot.
    pub async fn close(&self) {
        let referenced = self
            .handles()
            .filter(|handle| Arc::strong_count(handle) > 1)
            .count();
        if referenced > 0 {
            tracing::warn!(
                version = self.version,
                referenced,
                "Closing handles that are still referenced"
            );
        }
        close_all(self.handles()).await;
        tracing::debug!(version = self.version, "Registry snapshot closed");
    }
}

async fn close_all<'a>(handles: impl Iterator<Item = &'a Arc<DatabaseHandle>>) {
    join_all(handles.map(|handle| async move {
        if tokio::time::timeout(CLOSE_TIMEOUT, handle.close()).await.is_err() {
            tracing::warn!(
                database = %handle.name(),
                timeout = ?CLOSE_TIMEOUT,
                "Timed out closing database pool"
            );
        }
    }))
    .await;
}

struct Retiring {
    id: u64,
    snapshot: Arc<RegistrySnapshot>,
    timer: JoinHandle<()>,
}

/// The active snapshot plus snapshots waiting out their grace period.
pub struct Registry {
    active: ArcSwap<RegistrySnapshot>,
    retiring: Arc<Mutex<Vec<Retiring>>>,
    next_retirement: AtomicU64,
}

impl Registry {
    /// Wrap an already built snapshot.
    pub fn new(initial: RegistrySnapshot) -> Self {
        metrics::record_snapshot(initial.version(), initial.tenant_count());
        Self {
            active: ArcSwap::from_pointee(initial),
            retiring: Arc::new(Mutex::new(Vec::new())),
            next_retirement: AtomicU64::new(0),
        }
    }

    /// Build the first snapshot from `doc`.
    pub async fn bootstrap(doc: &ConfigDocument) -> Result<Self, BuildError> {
        let snapshot = RegistrySnapshot::build(doc).await?;
        Ok(Self::new(snapshot))
    }

    /// Handle for the tenant, or the default. Never blocks.
    pub fn resolve(&self, key: Option<&TenantKey>) -> Arc<DatabaseHandle> {
        let snapshot = self.active.load();
        let found = snapshot.lookup(key);
        metrics::record_resolve(found.is_some());
        Arc::clone(found.unwrap_or(&snapshot.default))
    }

    /// Handle for a raw host value.
    pub fn resolve_host(&self, host: &str) -> Arc<DatabaseHandle> {
        self.resolve(TenantKey::from_host(host).as_ref())
    }

    /// The active snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.active.load_full()
    }

    pub fn version(&self) -> u64 {
        self.active.load().version()
    }

    /// Build a snapshot for `doc` without publishing it.
    pub async fn rebuild(&self, doc: &ConfigDocument) -> Result<RegistrySnapshot, BuildError> {
        let result = RegistrySnapshot::build(doc).await;
        metrics::record_rebuild(result.is_ok());
        result
    }

    /// Make `snapshot` the active one and schedule the previous one for retirement.
    ///
    /// Must only be called by a single writer.
    pub fn publish(&self, snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let grace = snapshot.retire_grace();
        let version = snapshot.version();
        let tenants = snapshot.tenant_count();

        let previous = self.active.swap(Arc::new(snapshot));
        metrics::record_snapshot(version, tenants);

        tracing::info!(
            previous = previous.version(),
            version,
            tenants,
            retire_in = ?grace,
            "Registry snapshot published"
        );

        self.retire(Arc::clone(&previous), grace);
        previous
    }

    fn retire(&self, snapshot: Arc<RegistrySnapshot>, grace: Duration) {
        let id = self.next_retirement.fetch_add(1, Ordering::Relaxed);
        let retiring = Arc::clone(&self.retiring);

        let closing = Arc::clone(&snapshot);

        let mut list = lock(&self.retiring);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tracing::info!(version = closing.version(), "Retiring registry snapshot");
            closing.close().await;

            let mut list = lock(&retiring);
            if let Some(index) = list.iter().position(|entry| entry.id == id) {
                list.swap_remove(index);
            }
        });
        list.push(Retiring { id, snapshot, timer });
    }

    /// Versions of superseded snapshots that are not fully closed yet.
    pub fn retiring_versions(&self) -> Vec<u64> {
        lock(&self.retiring)
            .iter()
            .map(|entry| entry.snapshot.version())
            .collect()
    }

    /// Close the active snapshot and every snapshot not yet fully retired.
    ///
    /// A snapshot whose timer is already closing it is closed here too, so
    /// nothing is still closing when this returns. Close failures are logged;
    /// all snapshots are attempted.
    pub async fn release_all(&self) {
        let retiring: Vec<Retiring> = lock(&self.retiring).drain(..).collect();
        for entry in retiring {
            entry.timer.abort();
            entry.snapshot.close().await;
        }
        self.active.load_full().close().await;
        tracing::info!("Database handles released");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("version", &self.version())
            .field("retiring", &self.retiring_versions())
            .finish()
    }
}

fn lock(list: &Mutex<Vec<Retiring>>) -> MutexGuard<'_, Vec<Retiring>> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(version: u64, extra: &str) -> ConfigDocument {
        let mut doc: ConfigDocument = toml::from_str(&format!(
            r#"
            [application]
            host = "127.0.0.1"
            port = 0

            [database]
            driver = "sqlite"
            source = "sqlite::memory:"

            [reload]
            retire_grace_ms = 200

            {extra}
            "#
        ))
        .unwrap();
        doc.version = version;
        doc
    }

    const TWO_TENANTS: &str = r#"
        [databases."a.example.com"]
        driver = "sqlite"
        source = "sqlite::memory:"

        [databases."b.example.com"]
        driver = "sqlite"
        source = "sqlite::memory:"
    "#;

    fn key(s: &str) -> TenantKey {
        TenantKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn resolves_tenants_and_falls_back_to_default() {
        let registry = Registry::bootstrap(&document(1, TWO_TENANTS)).await.unwrap();

        assert_eq!(registry.resolve(Some(&key("a.example.com"))).name(), "a.example.com");
        assert_eq!(registry.resolve(Some(&key("b.example.com"))).name(), "b.example.com");
        assert_eq!(registry.resolve(Some(&key("c.example.com"))).name(), DEFAULT_DATABASE);
        assert_eq!(registry.resolve(None).name(), DEFAULT_DATABASE);
        assert_eq!(registry.resolve_host("A.EXAMPLE.COM:8000").name(), "a.example.com");
    }

    #[tokio::test]
    async fn exact_key_with_port_wins() {
        let extra = r#"
            [databases."a.example.com"]
            driver = "sqlite"
            source = "sqlite::memory:"

            [databases."a.example.com:8443"]
            driver = "sqlite"
            source = "sqlite::memory:"
        "#;
        let registry = Registry::bootstrap(&document(1, extra)).await.unwrap();
        assert_eq!(registry.resolve_host("a.example.com:8443").name(), "a.example.com:8443");
        assert_eq!(registry.resolve_host("a.example.com:80").name(), "a.example.com");
    }

    #[tokio::test]
    async fn failed_build_keeps_active_snapshot() {
        let registry = Registry::bootstrap(&document(1, TWO_TENANTS)).await.unwrap();
        let before = registry.resolve_host("b.example.com");

        let mut broken = document(2, TWO_TENANTS);
        broken.databases.get_mut("b.example.com").unwrap().source =
            "sqlite:///nonexistent-hostdb-dir/b.db".into();
        let err = registry.rebuild(&broken).await.unwrap_err();
        assert_eq!(err.name(), "b.example.com");

        assert_eq!(registry.version(), 1);
        let after = registry.resolve_host("b.example.com");
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!after.is_closed());
        after.ping().await.unwrap();
    }

    #[tokio::test]
    async fn optional_tenant_failure_falls_back_to_default() {
        let extra = r#"
            [databases."a.example.com"]
            driver = "sqlite"
            source = "sqlite::memory:"

            [databases."b.example.com"]
            driver = "sqlite"
            source = "sqlite:///nonexistent-hostdb-dir/b.db"
            required = false
        "#;
        let registry = Registry::bootstrap(&document(1, extra)).await.unwrap();
        assert_eq!(registry.snapshot().tenant_count(), 1);
        assert_eq!(registry.resolve_host("b.example.com").name(), DEFAULT_DATABASE);
    }

    #[tokio::test]
    async fn unreachable_default_fails_build() {
        let mut doc = document(1, TWO_TENANTS);
        doc.database.source = "sqlite:///nonexistent-hostdb-dir/default.db".into();
        let err = RegistrySnapshot::build(&doc).await.unwrap_err();
        assert_eq!(err.name(), DEFAULT_DATABASE);
    }

    #[tokio::test]
    async fn publish_retires_previous_after_grace() {
        let registry = Registry::bootstrap(&document(1, TWO_TENANTS)).await.unwrap();
        let old = registry.resolve_host("a.example.com");

        let next = registry.rebuild(&document(2, TWO_TENANTS)).await.unwrap();
        let previous = registry.publish(next);
        assert_eq!(previous.version(), 1);
        assert_eq!(registry.version(), 2);
        assert_eq!(registry.retiring_versions(), vec![1]);

        let new = registry.resolve_host("a.example.com");
        assert!(!Arc::ptr_eq(&old, &new));

        // Still usable inside the grace period.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!old.is_closed());
        old.ping().await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(registry.retiring_versions().is_empty());
    }

    #[tokio::test]
    async fn release_all_closes_active_and_retiring() {
        let mut doc = document(1, TWO_TENANTS);
        doc.reload.retire_grace_ms = 60_000;
        let registry = Registry::bootstrap(&doc).await.unwrap();
        let old = registry.resolve_host("a.example.com");

        doc.version = 2;
        let next = registry.rebuild(&doc).await.unwrap();
        registry.publish(next);
        let current = registry.resolve_host("a.example.com");

        registry.release_all().await;
        assert!(old.is_closed());
        assert!(current.is_closed());
        assert!(registry.snapshot().handles().all(|h| h.is_closed()));
        assert!(registry.retiring_versions().is_empty());
    }

    #[tokio::test]
    async fn release_all_waits_for_retirement_in_progress() {
        let mut doc = document(1, TWO_TENANTS);
        doc.reload.retire_grace_ms = 20;
        let registry = Arc::new(Registry::bootstrap(&doc).await.unwrap());
        let old = registry.resolve_host("a.example.com");
        let conn = old.as_sqlite().unwrap().acquire().await.unwrap();

        doc.version = 2;
        let next = registry.rebuild(&doc).await.unwrap();
        registry.publish(next);

        // The timer has started closing, but the pool waits for `conn`.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(old.is_closed());
        assert_eq!(registry.retiring_versions(), vec![1]);

        let releasing = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.release_all().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!releasing.is_finished());

        drop(conn);
        tokio::time::timeout(Duration::from_secs(2), releasing)
            .await
            .expect("release_all should finish once the connection is back")
            .unwrap();
        assert!(registry.retiring_versions().is_empty());
    }
}
