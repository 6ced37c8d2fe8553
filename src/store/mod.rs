use std::marker::PhantomData;
use std::sync::Arc;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::{now_ms, Database};
use crate::error::{LorebookError, Result};
use crate::mentions::EntityRef;
use crate::storage::{self, StoredRecord};

pub mod validation;

use validation::{Validator, Violation};

const RESERVED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const STORE: &'static str;
    const KIND: &'static str;

    fn validator() -> Arc<dyn Validator>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<T> {
    pub id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Record> Entity<T> {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(T::KIND, self.id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreChange {
    Created,
    Updated,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEvent {
    pub store: String,
    pub id: Uuid,
    pub change: StoreChange,
}

pub struct EntityStore<T: Record> {
    db: Database,
    validator: Arc<dyn Validator>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            validator: Arc::clone(&self.validator),
            _record: PhantomData,
        }
    }
}

impl<T: Record> EntityStore<T> {
    pub fn new(db: Database) -> Self {
        Self::with_validator(db, T::validator())
    }

    pub fn with_validator(db: Database, validator: Arc<dyn Validator>) -> Self {
        Self {
            db,
            validator,
            _record: PhantomData,
        }
    }

    pub fn store_name(&self) -> &'static str {
        T::STORE
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.db.subscribe()
    }

    pub(crate) fn validator(&self) -> Arc<dyn Validator> {
        Arc::clone(&self.validator)
    }

    pub async fn create(&self, payload: T) -> Result<Entity<T>> {
        self.db.ensure_ready()?;
        let validator = self.validator();
        let entity = self
            .db
            .run(move |conn| create_in(conn, validator.as_ref(), payload))
            .await?;
        self.publish(entity.id, StoreChange::Created);
        Ok(entity)
    }

    /// Shallow-merges `patch` into the stored fields; `id` and the timestamps
    /// cannot be patched.
    pub async fn update(&self, id: Uuid, patch: Value) -> Result<Entity<T>> {
        self.db.ensure_ready()?;
        let patch = patch_object(patch)?;
        let validator = self.validator();
        let entity = self
            .db
            .run(move |conn| update_in(conn, validator.as_ref(), id, patch))
            .await?;
        self.publish(id, StoreChange::Updated);
        Ok(entity)
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.db.ensure_ready()?;
        let existed = self.db.run(move |conn| remove_in::<T>(conn, id)).await?;
        if existed {
            self.publish(id, StoreChange::Removed);
        }
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Entity<T>>> {
        self.db.ensure_ready()?;
        let record = self
            .db
            .run(move |conn| storage::get_record(conn, T::STORE, &id.to_string()))
            .await?;
        record.map(into_entity::<T>).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Entity<T>>> {
        self.db.ensure_ready()?;
        let records = self
            .db
            .run(|conn| storage::list_records(conn, T::STORE))
            .await?;
        records.into_iter().map(into_entity::<T>).collect()
    }

    pub async fn count(&self) -> Result<u64> {
        self.db.ensure_ready()?;
        self.db
            .run(|conn| storage::count_records(conn, T::STORE))
            .await
    }

    pub(crate) fn publish(&self, id: Uuid, change: StoreChange) {
        self.db.publish(StoreEvent {
            store: T::STORE.to_string(),
            id,
            change,
        });
    }
}

pub(crate) fn patch_object(patch: Value) -> Result<Map<String, Value>> {
    match patch {
        Value::Object(patch) => Ok(patch),
        _ => Err(LorebookError::Validation(vec![Violation::new(
            "patch",
            "must be an object",
        )])),
    }
}

pub(crate) fn create_in<T: Record>(
    conn: &mut SqliteConnection,
    validator: &dyn Validator,
    payload: T,
) -> Result<Entity<T>> {
    let data = serde_json::to_value(&payload)?;
    check(validator, &data)?;

    let now = now_ms();
    let id = Uuid::new_v4();
    let record = StoredRecord {
        id: id.to_string(),
        data,
        created_at: now,
        updated_at: now,
    };
    conn.immediate_transaction::<_, LorebookError, _>(|conn| {
        storage::put_record(conn, T::STORE, &record)
    })?;
    tracing::debug!(store = T::STORE, %id, "created record");

    Ok(Entity {
        id,
        created_at: now,
        updated_at: now,
        data: payload,
    })
}

pub(crate) fn update_in<T: Record>(
    conn: &mut SqliteConnection,
    validator: &dyn Validator,
    id: Uuid,
    patch: Map<String, Value>,
) -> Result<Entity<T>> {
    let entity = conn.immediate_transaction::<_, LorebookError, _>(|conn| {
        let existing = storage::get_record(conn, T::STORE, &id.to_string())?.ok_or_else(|| {
            LorebookError::NotFound {
                store: T::STORE.to_string(),
                id: id.to_string(),
            }
        })?;
        let data = merge(existing.data, patch);
        check(validator, &data)?;
        let typed: T = serde_json::from_value(data.clone())?;
        let record = StoredRecord {
            updated_at: now_ms().max(existing.updated_at + 1),
            data,
            ..existing
        };
        storage::put_record(conn, T::STORE, &record)?;
        Ok(Entity {
            id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            data: typed,
        })
    })?;
    tracing::debug!(store = T::STORE, %id, "updated record");
    Ok(entity)
}

/// Returns whether the record existed; removing an absent id is not an error.
pub(crate) fn remove_in<T: Record>(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let existed = conn.immediate_transaction::<_, LorebookError, _>(|conn| {
        storage::delete_record(conn, T::STORE, &id.to_string())
    })?;
    if existed {
        tracing::debug!(store = T::STORE, %id, "removed record");
    }
    Ok(existed)
}

pub(crate) fn get_in<T: Record>(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Entity<T>>> {
    storage::get_record(conn, T::STORE, &id.to_string())?
        .map(into_entity::<T>)
        .transpose()
}

fn check(validator: &dyn Validator, data: &Value) -> Result<()> {
    let violations = validator.validate(data);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(LorebookError::Validation(violations))
    }
}

fn merge(existing: Value, patch: Map<String, Value>) -> Value {
    let mut merged = match existing {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        merged.insert(key, value);
    }
    Value::Object(merged)
}

fn into_entity<T: Record>(record: StoredRecord) -> Result<Entity<T>> {
    let id = Uuid::parse_str(&record.id)
        .map_err(|e| LorebookError::Serialization(format!("bad id {}: {e}", record.id)))?;
    Ok(Entity {
        id,
        created_at: record.created_at,
        updated_at: record.updated_at,
        data: serde_json::from_value(record.data)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_fields_but_not_identity() {
        let merged = merge(
            json!({"title": "Old", "content": "keep"}),
            json!({"title": "New", "id": "hijack", "updated_at": 0})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(merged, json!({"title": "New", "content": "keep"}));
    }
}
