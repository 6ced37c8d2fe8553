mod common;

use serde_json::json;
use uuid::Uuid;

use lorebook::domain::{Bookmark, Character, Note};
use lorebook::error::LorebookError;
use lorebook::mentions::EntityRef;
use lorebook::store::{EntityStore, StoreChange};

use common::{boot_db, open_db};

#[tokio::test]
async fn create_then_read_back() {
    let test = boot_db().await;
    let characters = EntityStore::<Character>::new(test.db.clone());

    let created = characters
        .create(Character {
            name: "Mira".to_string(),
            level: 3,
            class: Some("ranger".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(created.created_at, created.updated_at);

    let fetched = characters.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched, created);
    assert_eq!(characters.count().await.unwrap(), 1);
    assert_eq!(created.entity_ref().kind, "character");
}

#[tokio::test]
async fn invalid_payload_is_rejected_before_writing() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());

    let err = notes.create(Note::new("", "untitled")).await.unwrap_err();
    match err {
        LorebookError::Validation(violations) => {
            assert!(violations.iter().any(|v| v.field == "title"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(notes.count().await.unwrap(), 0);
}

#[tokio::test]
async fn update_merges_fields_and_bumps_updated_at() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());
    let created = notes.create(Note::new("Harbor", "Ships at dawn")).await.unwrap();

    let updated = notes
        .update(created.id, json!({"content": "Ships at dusk", "id": "ignored"}))
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.data.title, "Harbor");
    assert_eq!(updated.data.content, "Ships at dusk");
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > created.updated_at);

    let again = notes.update(created.id, json!({"title": "Docks"})).await.unwrap();
    assert!(again.updated_at > updated.updated_at);
    assert_eq!(notes.get_by_id(created.id).await.unwrap().unwrap(), again);
}

#[tokio::test]
async fn invalid_update_keeps_the_stored_record() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());
    let created = notes.create(Note::new("Harbor", "")).await.unwrap();

    let err = notes.update(created.id, json!({"title": 42})).await.unwrap_err();
    assert!(matches!(err, LorebookError::Validation(_)));
    let err = notes.update(created.id, json!("not an object")).await.unwrap_err();
    assert!(matches!(err, LorebookError::Validation(_)));

    assert_eq!(notes.get_by_id(created.id).await.unwrap().unwrap(), created);
}

#[tokio::test]
async fn updating_a_missing_record_is_not_found() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());

    let err = notes.update(Uuid::new_v4(), json!({"title": "Ghost"})).await.unwrap_err();
    assert!(matches!(err, LorebookError::NotFound { ref store, .. } if store == "notes"));
}

#[tokio::test]
async fn remove_is_idempotent() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());
    let created = notes.create(Note::new("Temp", "")).await.unwrap();

    notes.remove(created.id).await.unwrap();
    notes.remove(created.id).await.unwrap();
    assert!(notes.get_by_id(created.id).await.unwrap().is_none());
    assert!(notes.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_is_newest_first() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());
    let first = notes.create(Note::new("First", "")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = notes.create(Note::new("Second", "")).await.unwrap();

    let ids: Vec<Uuid> = notes.list().await.unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn stores_refuse_work_until_migrated() {
    let test = open_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());

    let err = notes.create(Note::new("Early", "")).await.unwrap_err();
    assert!(matches!(err, LorebookError::SchemaNotReady));
    assert!(matches!(notes.list().await, Err(LorebookError::SchemaNotReady)));
}

#[tokio::test]
async fn committed_changes_are_broadcast() {
    let test = boot_db().await;
    let notes = EntityStore::<Note>::new(test.db.clone());
    let mut events = notes.subscribe();

    let created = notes.create(Note::new("Watched", "")).await.unwrap();
    notes.update(created.id, json!({"content": "edited"})).await.unwrap();
    notes.remove(created.id).await.unwrap();
    notes.remove(created.id).await.unwrap();

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.store, "notes");
        assert_eq!(event.id, created.id);
        changes.push(event.change);
    }
    assert_eq!(
        changes,
        vec![StoreChange::Created, StoreChange::Updated, StoreChange::Removed]
    );
}

#[tokio::test]
async fn bookmarks_store_entity_refs() {
    let test = boot_db().await;
    let bookmarks = EntityStore::<Bookmark>::new(test.db.clone());
    let target = EntityRef::new("monster", "m1");

    let created = bookmarks
        .create(Bookmark {
            label: "Big bad".to_string(),
            target: target.clone(),
        })
        .await
        .unwrap();
    let fetched = bookmarks.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.data.target, target);
}
