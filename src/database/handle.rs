//! Pooled database handles.
//!
//! # Responsibilities
//! - Open a connection pool for one descriptor, dispatching on the dialect
//! - Verify connectivity before the handle is handed to a registry snapshot
//! - Close the pool when the owning snapshot is retired
//!
//! # Design Decisions
//! - Dialects are a closed enum; there is no trait object per driver
//! - A handle is immutable after `open`; pool limits change only by building a new handle
//! - Connection strings are redacted before they reach logs or errors

use std::fmt;
use std::time::Duration;

use sqlx::mysql::MySqlPool;
use sqlx::pool::PoolOptions;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;
use url::Url;

use crate::config::schema::{DatabaseConfig, Dialect};

/// A tenant database could not be brought up.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("database '{name}' ({dialect} {dsn}): failed to open: {source}")]
    Open {
        name: String,
        dialect: Dialect,
        dsn: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("database '{name}' ({dialect} {dsn}): connectivity check failed: {source}")]
    Ping {
        name: String,
        dialect: Dialect,
        dsn: String,
        #[source]
        source: sqlx::Error,
    },
}

impl BuildError {
    /// Name of the database entry that failed.
    pub fn name(&self) -> &str {
        match self {
            BuildError::Open { name, .. } | BuildError::Ping { name, .. } => name,
        }
    }
}

/// Connection pool for one of the supported dialects.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

/// An opened, pooled connection bound to one dialect and one data source.
pub struct DatabaseHandle {
    name: String,
    dialect: Dialect,
    dsn: String,
    pool: DbPool,
}

impl DatabaseHandle {
    /// Open the pool described by `config` and check that it answers.
    ///
    /// On failure nothing stays open.
    pub async fn open(name: &str, config: &DatabaseConfig) -> Result<Self, BuildError> {
        let dsn = redact(&config.source);
        let pool = match config.driver {
            Dialect::Postgres => pool_options::<sqlx::Postgres>(config)
                .connect(&config.source)
                .await
                .map(DbPool::Postgres),
            Dialect::MySql => pool_options::<sqlx::MySql>(config)
                .connect(&config.source)
                .await
                .map(DbPool::MySql),
            Dialect::Sqlite => pool_options::<sqlx::Sqlite>(config)
                .connect(&config.source)
                .await
                .map(DbPool::Sqlite),
        }
        .map_err(|source| BuildError::Open {
            name: name.to_string(),
            dialect: config.driver,
            dsn: dsn.clone(),
            source,
        })?;

        let handle = Self {
            name: name.to_string(),
            dialect: config.driver,
            dsn,
            pool,
        };

        if let Err(source) = handle.ping().await {
            handle.close().await;
            return Err(BuildError::Ping {
                name: handle.name,
                dialect: handle.dialect,
                dsn: handle.dsn,
                source,
            });
        }

        tracing::debug!(
            database = %handle.name,
            dialect = %handle.dialect,
            dsn = %handle.dsn,
            max_connections = config.max_open_conns,
            "Database handle opened"
        );
        Ok(handle)
    }

    /// Round-trip a trivial statement through the pool.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            DbPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            DbPool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            DbPool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        }
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        match &self.pool {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.pool {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Open connections (idle and in use).
    pub fn size(&self) -> u32 {
        match &self.pool {
            DbPool::Postgres(pool) => pool.size(),
            DbPool::MySql(pool) => pool.size(),
            DbPool::Sqlite(pool) => pool.size(),
        }
    }

    pub fn num_idle(&self) -> usize {
        match &self.pool {
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::MySql(pool) => pool.num_idle(),
            DbPool::Sqlite(pool) => pool.num_idle(),
        }
    }

    /// Configured entry name: the tenant host, or `*` for the default database.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Connection string with the password masked.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn as_postgres(&self) -> Option<&PgPool> {
        match &self.pool {
            DbPool::Postgres(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn as_mysql(&self) -> Option<&MySqlPool> {
        match &self.pool {
            DbPool::MySql(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn as_sqlite(&self) -> Option<&SqlitePool> {
        match &self.pool {
            DbPool::Sqlite(pool) => Some(pool),
            _ => None,
        }
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("dsn", &self.dsn)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn pool_options<DB: sqlx::Database>(config: &DatabaseConfig) -> PoolOptions<DB> {
    PoolOptions::<DB>::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.min_idle_conns)
        .acquire_timeout(config.acquire_timeout())
        .max_lifetime(non_zero_secs(config.conn_max_lifetime_secs))
        .idle_timeout(non_zero_secs(config.idle_timeout_secs))
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Mask the credentials of a connection string.
fn redact(source: &str) -> String {
    if let Ok(mut url) = Url::parse(source) {
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        if !url.cannot_be_a_base() || !source.contains('@') {
            return url.to_string();
        }
    }
    match source.rsplit_once('@') {
        Some((_, rest)) => format!("***@{}", rest),
        None => source.to_string(),
    }
}
