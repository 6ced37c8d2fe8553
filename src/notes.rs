use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::Database;
use crate::domain::Note;
use crate::error::Result;
use crate::indexation::{self, IndexationService};
use crate::mentions::{extract_mentions, EntityRef};
use crate::store::{self, Entity, EntityStore, Record, StoreChange};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LinkStatus {
    Updated,
    /// The note was saved but its links still reflect the previous content.
    Stale(String),
}

impl LinkStatus {
    pub fn is_stale(&self) -> bool {
        matches!(self, LinkStatus::Stale(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Saved<T> {
    pub entity: T,
    pub links: LinkStatus,
}

// Each write holds the connection across the note transaction and the link
// transaction that follows it, so no other write to the same note can land in
// between. A failed link transaction leaves the note saved and reports Stale.
#[derive(Clone)]
pub struct Notebook {
    db: Database,
    notes: EntityStore<Note>,
    index: IndexationService,
}

impl Notebook {
    pub fn new(db: Database) -> Self {
        Self {
            notes: EntityStore::new(db.clone()),
            index: IndexationService::new(db.clone()),
            db,
        }
    }

    pub fn store(&self) -> &EntityStore<Note> {
        &self.notes
    }

    pub fn index(&self) -> &IndexationService {
        &self.index
    }

    pub async fn create(&self, note: Note) -> Result<Saved<Entity<Note>>> {
        self.db.ensure_ready()?;
        let validator = self.notes.validator();
        let saved = self
            .db
            .run(move |conn| {
                let entity = store::create_in(conn, validator.as_ref(), note)?;
                let links = sync_links(conn, &entity);
                Ok(Saved { entity, links })
            })
            .await?;
        self.notes.publish(saved.entity.id, StoreChange::Created);
        Ok(saved)
    }

    pub async fn update(&self, id: Uuid, patch: Value) -> Result<Saved<Entity<Note>>> {
        self.db.ensure_ready()?;
        let patch = store::patch_object(patch)?;
        let validator = self.notes.validator();
        let saved = self
            .db
            .run(move |conn| {
                let entity = store::update_in(conn, validator.as_ref(), id, patch)?;
                let links = sync_links(conn, &entity);
                Ok(Saved { entity, links })
            })
            .await?;
        self.notes.publish(id, StoreChange::Updated);
        Ok(saved)
    }

    pub async fn set_content(
        &self,
        id: Uuid,
        content: impl Into<String>,
    ) -> Result<Saved<Entity<Note>>> {
        self.update(id, serde_json::json!({ "content": content.into() }))
            .await
    }

    pub async fn remove(&self, id: Uuid) -> Result<LinkStatus> {
        self.db.ensure_ready()?;
        let (existed, links) = self
            .db
            .run(move |conn| {
                let existed = store::remove_in::<Note>(conn, id)?;
                let from = note_ref(id);
                let links = match indexation::remove_links(conn, &from) {
                    Ok(_) => LinkStatus::Updated,
                    Err(err) => stale(&from, err.to_string()),
                };
                Ok((existed, links))
            })
            .await?;
        if existed {
            self.notes.publish(id, StoreChange::Removed);
        }
        Ok(links)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Entity<Note>>> {
        self.notes.get_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<Entity<Note>>> {
        self.notes.list().await
    }

    pub async fn backlinks(&self, target: &EntityRef) -> Result<Vec<EntityRef>> {
        self.index.backlinks_to(target).await
    }

    pub async fn reindex(&self, id: Uuid) -> Result<LinkStatus> {
        self.db.ensure_ready()?;
        self.db
            .run(move |conn| match store::get_in::<Note>(conn, id)? {
                Some(entity) => Ok(sync_links(conn, &entity)),
                None => {
                    indexation::remove_links(conn, &note_ref(id))?;
                    Ok(LinkStatus::Updated)
                }
            })
            .await
    }

    /// Returns how many notes were indexed. Stops at the first failure.
    pub async fn reindex_all(&self) -> Result<usize> {
        self.db.ensure_ready()?;
        let ids: Vec<Uuid> = self.notes.list().await?.into_iter().map(|n| n.id).collect();
        let mut indexed = 0;
        for id in ids {
            let relinked = self
                .db
                .run(move |conn| match store::get_in::<Note>(conn, id)? {
                    Some(entity) => {
                        let mentions = mentions_of(&entity.data);
                        indexation::replace_links(conn, &entity.entity_ref(), &mentions)?;
                        Ok(true)
                    }
                    None => Ok(false),
                })
                .await?;
            if relinked {
                indexed += 1;
            }
        }
        tracing::info!(notes = indexed, "reindexed note mentions");
        Ok(indexed)
    }
}

pub fn mentions_of(note: &Note) -> Vec<EntityRef> {
    extract_mentions(&note.content)
}

fn note_ref(id: Uuid) -> EntityRef {
    EntityRef::new(Note::KIND, id.to_string())
}

fn sync_links(conn: &mut SqliteConnection, entity: &Entity<Note>) -> LinkStatus {
    let from = entity.entity_ref();
    match indexation::replace_links(conn, &from, &mentions_of(&entity.data)) {
        Ok(()) => LinkStatus::Updated,
        Err(err) => stale(&from, err.to_string()),
    }
}

fn stale(from: &EntityRef, reason: String) -> LinkStatus {
    tracing::warn!(note = %from, reason = %reason, "note saved but links not updated");
    LinkStatus::Stale(reason)
}
