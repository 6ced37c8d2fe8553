use diesel::sqlite::SqliteConnection;
use serde_json::Value;

use crate::error::{LorebookError, Result};
use crate::migrations::registry::MigrationStep;
use crate::storage::{self, StoredRecord};

pub struct MigrationTxn<'c> {
    conn: &'c mut SqliteConnection,
    step: &'c MigrationStep,
    now: i64,
}

impl<'c> MigrationTxn<'c> {
    pub(crate) fn new(conn: &'c mut SqliteConnection, step: &'c MigrationStep, now: i64) -> Self {
        Self { conn, step, now }
    }

    pub fn version(&self) -> u32 {
        self.step.version
    }

    pub fn declared_stores(&self) -> Vec<&str> {
        self.step.store_names().collect()
    }

    /// Only stores the running step declared are reachable.
    pub fn store(&mut self, name: &str) -> Result<ScopedStore<'_>> {
        if !self.step.store_names().any(|declared| declared == name) {
            tracing::error!(
                version = self.step.version,
                store = name,
                "migration touched an undeclared store"
            );
            return Err(LorebookError::UndeclaredStore(name.to_string()));
        }
        Ok(ScopedStore {
            conn: &mut *self.conn,
            name: name.to_string(),
            now: self.now,
        })
    }
}

pub struct ScopedStore<'t> {
    conn: &'t mut SqliteConnection,
    name: String,
    now: i64,
}

impl ScopedStore<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&mut self, id: &str) -> Result<Option<StoredRecord>> {
        storage::get_record(self.conn, &self.name, id)
    }

    pub fn list(&mut self) -> Result<Vec<StoredRecord>> {
        storage::list_records(self.conn, &self.name)
    }

    pub fn count(&mut self) -> Result<u64> {
        storage::count_records(self.conn, &self.name)
    }

    pub fn put(&mut self, record: &StoredRecord) -> Result<()> {
        storage::put_record(self.conn, &self.name, record)
    }

    pub fn insert(&mut self, data: Value) -> Result<StoredRecord> {
        let record = StoredRecord {
            id: uuid::Uuid::new_v4().to_string(),
            data,
            created_at: self.now,
            updated_at: self.now,
        };
        self.put(&record)?;
        Ok(record)
    }

    pub fn delete(&mut self, id: &str) -> Result<bool> {
        storage::delete_record(self.conn, &self.name, id)
    }

    /// Rewrites every record for which `edit` reports a change. Returns how
    /// many records were rewritten.
    pub fn update_each<F>(&mut self, mut edit: F) -> Result<usize>
    where
        F: FnMut(&mut Value) -> bool,
    {
        let mut changed = 0;
        for mut record in self.list()? {
            if edit(&mut record.data) {
                record.updated_at = self.now.max(record.updated_at);
                self.put(&record)?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
