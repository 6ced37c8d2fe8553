use std::path::Path;
use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use once_cell::sync::OnceCell;
use tokio::sync::broadcast;

use crate::config::DatabaseConfig;
use crate::error::{LorebookError, Result};
use crate::migrations::{catalog, MigrationRunner, SchemaRegistry};
use crate::store::StoreEvent;

const EVENT_CAPACITY: usize = 256;

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

// One pooled connection: every task runs on it in turn, and a task that has
// started on the blocking worker finishes even if its caller is dropped.
#[derive(Clone)]
pub struct Database {
    path: String,
    pool: SqlitePool,
    ready: Arc<OnceCell<u32>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Database {
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.clone();
        let in_memory = path == ":memory:";
        if !in_memory {
            ensure_parent_dir(&path)?;
        }

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(path.clone());
        let pool: SqlitePool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .await
            .map_err(|e| LorebookError::Runtime(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let db = Self {
            path,
            pool,
            ready: Arc::new(OnceCell::new()),
            events,
        };

        let pragmas = if in_memory {
            format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms)
        } else {
            format!(
                "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
                config.busy_timeout_ms
            )
        };
        db.run(move |conn| Ok(conn.batch_execute(&pragmas)?)).await?;
        tracing::debug!(path = %db.path, "opened database");
        Ok(db)
    }

    pub async fn boot(config: &DatabaseConfig) -> Result<Self> {
        let db = Self::open(config).await?;
        let registry = catalog::registry()?;
        db.migrate(&registry).await?;
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn migrate(&self, registry: &SchemaRegistry) -> Result<u32> {
        let version = MigrationRunner::new(self.clone(), registry.clone())
            .migrate()
            .await?;
        if self.ready.set(version).is_ok() {
            tracing::info!(version, "schema ready");
        }
        Ok(version)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    pub fn ready_version(&self) -> Option<u32> {
        self.ready.get().copied()
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(LorebookError::SchemaNotReady)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| LorebookError::Runtime(e.to_string()))
    }

    pub async fn run<R, F>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut conn = self.conn().await?;
        conn.spawn_blocking(move |conn| Ok(task(conn)))
            .await
            .map_err(|e| LorebookError::Runtime(e.to_string()))?
    }

    pub async fn transaction<R, F>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run(move |conn| conn.immediate_transaction::<R, LorebookError, _>(task))
            .await
    }
}

pub fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LorebookError::Runtime(e.to_string()))?;
    }
    Ok(())
}

pub(crate) fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
