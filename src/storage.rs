use std::collections::BTreeSet;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{LorebookError, Result};

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,47}$").expect("valid identifier pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    pub name: String,
    pub indexes: Vec<String>,
    pub multi_entry: Vec<String>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            multi_entry: Vec::new(),
        }
    }

    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    pub fn multi_entry(mut self, field: impl Into<String>) -> Self {
        self.multi_entry.push(field.into());
        self
    }

    pub fn invalid_identifier(&self) -> Option<&str> {
        std::iter::once(&self.name)
            .chain(self.indexes.iter())
            .chain(self.multi_entry.iter())
            .find(|ident| !is_valid_identifier(ident))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub key: String,
    pub version: u32,
    pub name: String,
    pub applied_at: i64,
}

#[derive(QueryableByName)]
struct RecordRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    data: String,
    #[diesel(sql_type = BigInt)]
    created_at: i64,
    #[diesel(sql_type = BigInt)]
    updated_at: i64,
}

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = BigInt)]
    version: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct IdRow {
    #[diesel(sql_type = Text)]
    id: String,
}

#[derive(QueryableByName)]
struct CatalogRow {
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    indexes: String,
    #[diesel(sql_type = Text)]
    multi_entry: String,
}

#[derive(QueryableByName)]
struct HistoryRow {
    #[diesel(sql_type = Text)]
    migration_key: String,
    #[diesel(sql_type = BigInt)]
    version: i64,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = BigInt)]
    applied_at: i64,
}

pub fn is_valid_identifier(ident: &str) -> bool {
    IDENT_RE.is_match(ident)
}

fn table_name(store: &str) -> Result<String> {
    if !is_valid_identifier(store) {
        return Err(LorebookError::Runtime(format!("invalid store name `{store}`")));
    }
    Ok(format!("store_{store}"))
}

fn multi_entry_table(store: &str, field: &str) -> String {
    format!("store_{store}__{field}")
}

pub fn ensure_meta_tables(conn: &mut SqliteConnection) -> Result<()> {
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS schema_history (
            migration_key TEXT PRIMARY KEY NOT NULL,
            version INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS schema_stores (
            name TEXT PRIMARY KEY NOT NULL,
            indexes TEXT NOT NULL,
            multi_entry TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    Ok(())
}

pub fn read_installed_version(conn: &mut SqliteConnection) -> Result<u32> {
    let row = diesel::sql_query("SELECT version FROM schema_meta WHERE id = 1")
        .get_result::<VersionRow>(conn)
        .optional()?;
    let version = row.map(|row| row.version).unwrap_or(0);
    u32::try_from(version)
        .map_err(|_| LorebookError::Runtime(format!("corrupt schema version {version}")))
}

pub fn write_installed_version(conn: &mut SqliteConnection, version: u32, now: i64) -> Result<()> {
    diesel::sql_query(
        "INSERT INTO schema_meta (id, version, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at",
    )
    .bind::<BigInt, _>(i64::from(version))
    .bind::<BigInt, _>(now)
    .execute(conn)?;
    Ok(())
}

pub fn record_history(conn: &mut SqliteConnection, applied: &AppliedMigration) -> Result<()> {
    diesel::sql_query(
        "INSERT INTO schema_history (migration_key, version, name, applied_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind::<Text, _>(&applied.key)
    .bind::<BigInt, _>(i64::from(applied.version))
    .bind::<Text, _>(&applied.name)
    .bind::<BigInt, _>(applied.applied_at)
    .execute(conn)?;
    Ok(())
}

pub fn read_history(conn: &mut SqliteConnection) -> Result<Vec<AppliedMigration>> {
    let rows = diesel::sql_query(
        "SELECT migration_key, version, name, applied_at FROM schema_history ORDER BY version ASC",
    )
    .get_results::<HistoryRow>(conn)?;
    rows.into_iter()
        .map(|row| -> Result<AppliedMigration> {
            let version = u32::try_from(row.version).map_err(|_| {
                LorebookError::Runtime(format!("corrupt migration version {}", row.version))
            })?;
            Ok(AppliedMigration {
                key: row.migration_key,
                version,
                name: row.name,
                applied_at: row.applied_at,
            })
        })
        .collect()
}

fn read_catalog(conn: &mut SqliteConnection, store: &str) -> Result<Option<StoreSchema>> {
    let row = diesel::sql_query(
        "SELECT name, indexes, multi_entry FROM schema_stores WHERE name = ?1",
    )
    .bind::<Text, _>(store)
    .get_result::<CatalogRow>(conn)
    .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(StoreSchema {
        name: row.name,
        indexes: serde_json::from_str(&row.indexes)?,
        multi_entry: serde_json::from_str(&row.multi_entry)?,
    }))
}

// Multi-entry indexes live in a companion table `store_<name>__<field>` with
// one (value, id) row per array element.
pub fn ensure_store(conn: &mut SqliteConnection, schema: &StoreSchema) -> Result<()> {
    if let Some(ident) = schema.invalid_identifier() {
        return Err(LorebookError::Runtime(format!("invalid identifier `{ident}`")));
    }
    let table = table_name(&schema.name)?;
    diesel::sql_query(format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )"
    ))
    .execute(conn)?;

    let existing = read_catalog(conn, &schema.name)?.unwrap_or_else(|| StoreSchema::new(&schema.name));
    let indexes = union(&existing.indexes, &schema.indexes);
    let multi_entry = union(&existing.multi_entry, &schema.multi_entry);

    for field in &indexes {
        diesel::sql_query(format!(
            "CREATE INDEX IF NOT EXISTS idx_{store}_{field} ON {table} (json_extract(data, '$.{field}'))",
            store = schema.name,
        ))
        .execute(conn)?;
    }

    for field in &multi_entry {
        let entries = multi_entry_table(&schema.name, field);
        diesel::sql_query(format!(
            "CREATE TABLE IF NOT EXISTS {entries} (
                value TEXT NOT NULL,
                id TEXT NOT NULL,
                PRIMARY KEY (value, id)
            )"
        ))
        .execute(conn)?;
        diesel::sql_query(format!(
            "CREATE INDEX IF NOT EXISTS idx_{entries}_id ON {entries} (id)"
        ))
        .execute(conn)?;
        if !existing.multi_entry.contains(field) {
            backfill_multi_entry(conn, &schema.name, field)?;
        }
    }

    diesel::sql_query(
        "INSERT INTO schema_stores (name, indexes, multi_entry) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET indexes = excluded.indexes, multi_entry = excluded.multi_entry",
    )
    .bind::<Text, _>(&schema.name)
    .bind::<Text, _>(serde_json::to_string(&indexes)?)
    .bind::<Text, _>(serde_json::to_string(&multi_entry)?)
    .execute(conn)?;
    Ok(())
}

fn union(existing: &[String], declared: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for field in declared {
        if !merged.contains(field) {
            merged.push(field.clone());
        }
    }
    merged
}

fn backfill_multi_entry(conn: &mut SqliteConnection, store: &str, field: &str) -> Result<()> {
    for record in list_records(conn, store)? {
        write_entries(conn, store, field, &record)?;
    }
    Ok(())
}

pub fn store_exists(conn: &mut SqliteConnection, store: &str) -> Result<bool> {
    Ok(read_catalog(conn, store)?.is_some())
}

pub fn list_stores(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let rows = diesel::sql_query("SELECT name AS id FROM schema_stores ORDER BY name")
        .get_results::<IdRow>(conn)?;
    Ok(rows.into_iter().map(|row| row.id).collect())
}

pub fn get_record(conn: &mut SqliteConnection, store: &str, id: &str) -> Result<Option<StoredRecord>> {
    let table = table_name(store)?;
    let row = diesel::sql_query(format!(
        "SELECT id, data, created_at, updated_at FROM {table} WHERE id = ?1"
    ))
    .bind::<Text, _>(id)
    .get_result::<RecordRow>(conn)
    .optional()?;
    row.map(map_row).transpose()
}

pub fn list_records(conn: &mut SqliteConnection, store: &str) -> Result<Vec<StoredRecord>> {
    let table = table_name(store)?;
    let rows = diesel::sql_query(format!(
        "SELECT id, data, created_at, updated_at FROM {table} ORDER BY created_at DESC, id ASC"
    ))
    .get_results::<RecordRow>(conn)?;
    rows.into_iter().map(map_row).collect()
}

pub fn count_records(conn: &mut SqliteConnection, store: &str) -> Result<u64> {
    let table = table_name(store)?;
    let row = diesel::sql_query(format!("SELECT COUNT(*) AS count FROM {table}"))
        .get_result::<CountRow>(conn)?;
    Ok(row.count as u64)
}

pub fn put_record(conn: &mut SqliteConnection, store: &str, record: &StoredRecord) -> Result<()> {
    let table = table_name(store)?;
    let schema = read_catalog(conn, store)?
        .ok_or_else(|| LorebookError::Runtime(format!("store `{store}` does not exist")))?;
    diesel::sql_query(format!(
        "INSERT INTO {table} (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at"
    ))
    .bind::<Text, _>(&record.id)
    .bind::<Text, _>(serde_json::to_string(&record.data)?)
    .bind::<BigInt, _>(record.created_at)
    .bind::<BigInt, _>(record.updated_at)
    .execute(conn)?;

    for field in &schema.multi_entry {
        clear_entries(conn, store, field, &record.id)?;
        write_entries(conn, store, field, record)?;
    }
    Ok(())
}

pub fn delete_record(conn: &mut SqliteConnection, store: &str, id: &str) -> Result<bool> {
    let table = table_name(store)?;
    let schema = read_catalog(conn, store)?
        .ok_or_else(|| LorebookError::Runtime(format!("store `{store}` does not exist")))?;
    for field in &schema.multi_entry {
        clear_entries(conn, store, field, id)?;
    }
    let deleted = diesel::sql_query(format!("DELETE FROM {table} WHERE id = ?1"))
        .bind::<Text, _>(id)
        .execute(conn)?;
    Ok(deleted > 0)
}

/// Ids of the records whose array `field` contains `value`, sorted.
pub fn lookup_multi_entry(
    conn: &mut SqliteConnection,
    store: &str,
    field: &str,
    value: &str,
) -> Result<Vec<String>> {
    table_name(store)?;
    if !is_valid_identifier(field) {
        return Err(LorebookError::Runtime(format!("invalid field name `{field}`")));
    }
    let entries = multi_entry_table(store, field);
    let rows = diesel::sql_query(format!(
        "SELECT id FROM {entries} WHERE value = ?1 ORDER BY id ASC"
    ))
    .bind::<Text, _>(value)
    .get_results::<IdRow>(conn)?;
    Ok(rows.into_iter().map(|row| row.id).collect())
}

fn clear_entries(conn: &mut SqliteConnection, store: &str, field: &str, id: &str) -> Result<()> {
    let entries = multi_entry_table(store, field);
    diesel::sql_query(format!("DELETE FROM {entries} WHERE id = ?1"))
        .bind::<Text, _>(id)
        .execute(conn)?;
    Ok(())
}

fn write_entries(
    conn: &mut SqliteConnection,
    store: &str,
    field: &str,
    record: &StoredRecord,
) -> Result<()> {
    let entries = multi_entry_table(store, field);
    for value in entry_values(record.data.get(field)) {
        diesel::sql_query(format!(
            "INSERT OR IGNORE INTO {entries} (value, id) VALUES (?1, ?2)"
        ))
        .bind::<Text, _>(&value)
        .bind::<Text, _>(&record.id)
        .execute(conn)?;
    }
    Ok(())
}

fn entry_values(field: Option<&Value>) -> BTreeSet<String> {
    let key = |value: &Value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match field {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => items.iter().map(key).collect(),
        Some(other) => BTreeSet::from([key(other)]),
    }
}

fn map_row(row: RecordRow) -> Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.id,
        data: serde_json::from_str(&row.data)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
