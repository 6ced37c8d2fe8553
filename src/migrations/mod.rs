use diesel::sqlite::SqliteConnection;

use crate::db::{now_ms, Database};
use crate::error::{LorebookError, Result};
use crate::storage::{self, AppliedMigration};

pub mod catalog;
pub mod registry;
pub mod txn;

pub use registry::{migration_key, MigrationStep, SchemaRegistry};
pub use storage::StoreSchema;
pub use txn::{MigrationTxn, ScopedStore};

pub struct MigrationRunner {
    db: Database,
    registry: SchemaRegistry,
}

impl MigrationRunner {
    pub fn new(db: Database, registry: SchemaRegistry) -> Self {
        Self { db, registry }
    }

    pub async fn installed_version(&self) -> Result<u32> {
        self.db
            .run(|conn| {
                storage::ensure_meta_tables(conn)?;
                storage::read_installed_version(conn)
            })
            .await
    }

    pub async fn history(&self) -> Result<Vec<AppliedMigration>> {
        self.db
            .run(|conn| {
                storage::ensure_meta_tables(conn)?;
                storage::read_history(conn)
            })
            .await
    }

    pub async fn pending(&self) -> Result<Vec<MigrationStep>> {
        let installed = self.installed_version().await?;
        Ok(self.registry.pending(installed).cloned().collect())
    }

    pub async fn migrate(&self) -> Result<u32> {
        let installed = self.installed_version().await?;
        self.upgrade(installed).await
    }

    /// Applies every step above the higher of `current_version` and the
    /// persisted version, all in one transaction. Returns the version now
    /// persisted.
    pub async fn upgrade(&self, current_version: u32) -> Result<u32> {
        let registry = self.registry.clone();
        let result = self
            .db
            .transaction(move |conn| run_pending(conn, &registry, current_version))
            .await;
        match &result {
            Ok(version) => tracing::info!(version = *version, "schema upgrade complete"),
            Err(err) => tracing::error!(error = %err, "schema upgrade rolled back"),
        }
        result
    }
}

fn run_pending(
    conn: &mut SqliteConnection,
    registry: &SchemaRegistry,
    current_version: u32,
) -> Result<u32> {
    storage::ensure_meta_tables(conn)?;
    let persisted = storage::read_installed_version(conn)?;
    if persisted != current_version {
        tracing::warn!(
            requested = current_version,
            persisted,
            "caller's schema version differs from the database; using the higher one"
        );
    }
    let floor = current_version.max(persisted);

    let mut installed = persisted;
    for step in registry.pending(floor) {
        apply_step(conn, step)?;
        installed = step.version;
    }

    if installed != persisted {
        storage::write_installed_version(conn, installed, now_ms())?;
    }
    Ok(installed)
}

fn apply_step(conn: &mut SqliteConnection, step: &MigrationStep) -> Result<()> {
    tracing::info!(version = step.version, name = %step.name, "applying migration");
    let failed = |err: LorebookError| LorebookError::MigrationApply {
        version: step.version,
        name: step.name.clone(),
        reason: err.to_string(),
    };

    for schema in &step.affected_stores {
        storage::ensure_store(conn, schema).map_err(failed)?;
    }

    let now = now_ms();
    {
        let mut txn = MigrationTxn::new(conn, step, now);
        (step.apply)(&mut txn).map_err(failed)?;
    }

    storage::record_history(
        conn,
        &AppliedMigration {
            key: step.key(),
            version: step.version,
            name: step.name.clone(),
            applied_at: now,
        },
    )
    .map_err(failed)
}
