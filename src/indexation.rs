use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::json;

use crate::db::{now_ms, Database};
use crate::error::{LorebookError, Result};
use crate::mentions::EntityRef;
use crate::storage::{self, StoredRecord};

// One record per source entity, keyed "kind:id", holding its targets in `to`.
// The multi-entry index over `to` answers backlink queries.
pub const MENTIONS_STORE: &str = "mentions";
pub const TARGETS_FIELD: &str = "to";

#[derive(Clone)]
pub struct IndexationService {
    db: Database,
}

impl IndexationService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replaces every outgoing link of `from` with exactly `mentioned`. On
    /// failure the previous links are left untouched.
    pub async fn set_links(&self, from: &EntityRef, mentioned: &[EntityRef]) -> Result<()> {
        self.db.ensure_ready()?;
        let from = from.clone();
        let mentioned = mentioned.to_vec();
        self.db
            .run(move |conn| replace_links(conn, &from, &mentioned))
            .await
    }

    pub async fn clear_links(&self, from: &EntityRef) -> Result<()> {
        self.db.ensure_ready()?;
        let from = from.clone();
        self.db.run(move |conn| remove_links(conn, &from)).await?;
        Ok(())
    }

    pub async fn backlinks_to(&self, to: &EntityRef) -> Result<Vec<EntityRef>> {
        self.db.ensure_ready()?;
        let value = to.to_string();
        let sources = self
            .db
            .run(move |conn| storage::lookup_multi_entry(conn, MENTIONS_STORE, TARGETS_FIELD, &value))
            .await
            .map_err(indexation_error)?;
        let mut refs = sources
            .iter()
            .map(|source| EntityRef::parse(source))
            .collect::<Result<Vec<_>>>()
            .map_err(indexation_error)?;
        refs.sort();
        refs.dedup();
        Ok(refs)
    }

    pub async fn links_from(&self, from: &EntityRef) -> Result<Vec<EntityRef>> {
        self.db.ensure_ready()?;
        let key = from.to_string();
        let record = self
            .db
            .run(move |conn| storage::get_record(conn, MENTIONS_STORE, &key))
            .await
            .map_err(indexation_error)?;
        let Some(record) = record else {
            return Ok(Vec::new());
        };
        record
            .data
            .get(TARGETS_FIELD)
            .and_then(|targets| targets.as_array())
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|target| target.as_str())
                    .map(EntityRef::parse)
                    .collect::<Result<Vec<_>>>()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(indexation_error)
    }
}

pub(crate) fn replace_links(
    conn: &mut SqliteConnection,
    from: &EntityRef,
    mentioned: &[EntityRef],
) -> Result<()> {
    if let Some(bad) = std::iter::once(from).chain(mentioned).find(|r| !r.is_valid()) {
        return Err(LorebookError::Indexation(format!(
            "invalid entity reference `{bad}`"
        )));
    }
    let key = from.to_string();
    let mut targets: Vec<String> = Vec::with_capacity(mentioned.len());
    for target in mentioned {
        let target = target.to_string();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    conn.immediate_transaction::<_, LorebookError, _>(|conn| {
        if targets.is_empty() {
            storage::delete_record(conn, MENTIONS_STORE, &key)?;
            return Ok(());
        }
        let now = now_ms();
        let created_at = storage::get_record(conn, MENTIONS_STORE, &key)?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let record = StoredRecord {
            id: key.clone(),
            data: json!({ "from": from, "to": targets }),
            created_at,
            updated_at: now,
        };
        storage::put_record(conn, MENTIONS_STORE, &record)
    })
    .map_err(indexation_error)?;
    tracing::debug!(from = %from, links = targets.len(), "replaced mention links");
    Ok(())
}

pub(crate) fn remove_links(conn: &mut SqliteConnection, from: &EntityRef) -> Result<bool> {
    let key = from.to_string();
    let removed = conn
        .immediate_transaction::<_, LorebookError, _>(|conn| {
            storage::delete_record(conn, MENTIONS_STORE, &key)
        })
        .map_err(indexation_error)?;
    if removed {
        tracing::debug!(from = %from, "cleared mention links");
    }
    Ok(removed)
}

fn indexation_error(err: LorebookError) -> LorebookError {
    match err {
        LorebookError::Indexation(_) | LorebookError::SchemaNotReady => err,
        other => LorebookError::Indexation(other.to_string()),
    }
}
