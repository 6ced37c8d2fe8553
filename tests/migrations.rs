mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use lorebook::error::LorebookError;
use lorebook::migrations::{catalog, MigrationRunner, MigrationStep, SchemaRegistry, StoreSchema};
use lorebook::storage;

use common::{open_db, store_exists};

#[tokio::test]
async fn upgrade_from_zero_reaches_latest_version() {
    let test = open_db().await;
    let registry = catalog::registry().unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry.clone());

    let version = runner.upgrade(0).await.unwrap();
    assert_eq!(version, registry.latest_version());
    assert_eq!(runner.installed_version().await.unwrap(), version);

    for store in ["notes", "characters", "monsters", "parties", "encounters", "mentions", "bookmarks"] {
        assert!(store_exists(&test.db, store).await, "missing store {store}");
    }

    let keys: Vec<String> = runner.history().await.unwrap().into_iter().map(|m| m.key).collect();
    assert_eq!(keys.first().map(String::as_str), Some("0001_init"));
    assert_eq!(keys.len(), registry.all_steps().len());
    assert!(runner.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn second_upgrade_runs_nothing() {
    let test = open_db().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let registry = SchemaRegistry::new(vec![MigrationStep::new(1, "init")
        .affects(StoreSchema::new("notes"))
        .apply(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry);

    assert_eq!(runner.upgrade(0).await.unwrap(), 1);
    assert_eq!(runner.upgrade(1).await.unwrap(), 1);
    assert_eq!(runner.migrate().await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_caller_version_does_not_replay_steps() {
    let test = open_db().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let registry = SchemaRegistry::new(vec![
        MigrationStep::new(1, "init").affects(StoreSchema::new("notes")),
        MigrationStep::new(2, "seed")
            .affects(StoreSchema::new("notes"))
            .apply(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
    ])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry);

    runner.upgrade(0).await.unwrap();
    assert_eq!(runner.upgrade(0).await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn caller_ahead_of_database_gets_the_persisted_version() {
    let test = open_db().await;
    let registry = SchemaRegistry::new(vec![
        MigrationStep::new(1, "init").affects(StoreSchema::new("notes")),
        MigrationStep::new(2, "bookmarks").affects(StoreSchema::new("bookmarks")),
    ])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry);

    assert_eq!(runner.upgrade(5).await.unwrap(), 0);
    assert_eq!(runner.installed_version().await.unwrap(), 0);

    assert_eq!(runner.upgrade(1).await.unwrap(), 2);
    assert_eq!(runner.installed_version().await.unwrap(), 2);
    assert!(!store_exists(&test.db, "notes").await);
    assert!(store_exists(&test.db, "bookmarks").await);
}

#[tokio::test]
async fn failing_step_rolls_back_the_whole_upgrade() {
    let test = open_db().await;
    let registry = SchemaRegistry::new(vec![
        MigrationStep::new(1, "init").affects(StoreSchema::new("notes")),
        MigrationStep::new(2, "broken")
            .affects(StoreSchema::new("bookmarks"))
            .apply(|_| Err(LorebookError::Runtime("disk on fire".to_string()))),
    ])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry);

    let err = runner.upgrade(0).await.unwrap_err();
    match err {
        LorebookError::MigrationApply { version, name, reason } => {
            assert_eq!(version, 2);
            assert_eq!(name, "broken");
            assert!(reason.contains("disk on fire"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(runner.installed_version().await.unwrap(), 0);
    assert!(runner.history().await.unwrap().is_empty());
    assert!(!store_exists(&test.db, "notes").await);
    assert!(!store_exists(&test.db, "bookmarks").await);
}

#[tokio::test]
async fn later_versions_add_stores_to_an_existing_database() {
    let test = open_db().await;
    let v1 = SchemaRegistry::new(vec![
        MigrationStep::new(1, "notes").affects(StoreSchema::new("notes").index("title"))
    ])
    .unwrap();
    assert_eq!(MigrationRunner::new(test.db.clone(), v1).migrate().await.unwrap(), 1);
    assert!(!store_exists(&test.db, "bookmarks").await);

    let v2 = SchemaRegistry::new(vec![
        MigrationStep::new(1, "notes").affects(StoreSchema::new("notes").index("title")),
        MigrationStep::new(2, "bookmarks").affects(StoreSchema::new("bookmarks")),
    ])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), v2);
    assert_eq!(runner.pending().await.unwrap().len(), 1);
    assert_eq!(runner.migrate().await.unwrap(), 2);
    assert!(store_exists(&test.db, "notes").await);
    assert!(store_exists(&test.db, "bookmarks").await);
}

#[tokio::test]
async fn touching_an_undeclared_store_aborts() {
    let test = open_db().await;
    let registry = SchemaRegistry::new(vec![
        MigrationStep::new(1, "init").affects(StoreSchema::new("notes")),
        MigrationStep::new(2, "sneaky")
            .affects(StoreSchema::new("notes"))
            .apply(|txn| {
                txn.store("characters")?.insert(json!({"name": "Nope"}))?;
                Ok(())
            }),
    ])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry);

    let err = runner.upgrade(0).await.unwrap_err();
    assert!(matches!(err, LorebookError::MigrationApply { version: 2, .. }));
    assert!(err.to_string().contains("characters"));
    assert_eq!(runner.installed_version().await.unwrap(), 0);
}

#[tokio::test]
async fn no_op_steps_still_advance_the_version() {
    let test = open_db().await;
    let registry = SchemaRegistry::new(vec![
        MigrationStep::new(1, "init").affects(StoreSchema::new("notes")),
        MigrationStep::no_op(5, "retired_feature"),
    ])
    .unwrap();
    let runner = MigrationRunner::new(test.db.clone(), registry);

    assert_eq!(runner.upgrade(0).await.unwrap(), 5);
    let keys: Vec<String> = runner.history().await.unwrap().into_iter().map(|m| m.key).collect();
    assert_eq!(keys, vec!["0001_init", "0005_retired_feature"]);
}

#[tokio::test]
async fn later_steps_see_data_written_by_earlier_ones() {
    let test = open_db().await;
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);
    let registry = SchemaRegistry::new(vec![
        MigrationStep::new(1, "seed")
            .affects(StoreSchema::new("monsters"))
            .apply(|txn| {
                let mut monsters = txn.store("monsters")?;
                monsters.insert(json!({"name": "Goblin", "challenge": 0.25, "hit_points": 7}))?;
                monsters.insert(json!({"name": "Ogre", "challenge": 2.0, "hit_points": 59}))?;
                Ok(())
            }),
        MigrationStep::new(2, "count")
            .affects(StoreSchema::new("monsters").index("name"))
            .apply(move |txn| {
                let count = txn.store("monsters")?.count()?;
                observed.store(count as usize, Ordering::SeqCst);
                Ok(())
            }),
    ])
    .unwrap();

    let version = test.db.migrate(&registry).await.unwrap();
    assert_eq!(version, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tag_backfill_fills_notes_written_before_tags() {
    let test = open_db().await;
    let legacy = SchemaRegistry::new(vec![MigrationStep::new(1, "init")
        .affects(StoreSchema::new("notes").index("title"))
        .apply(|txn| {
            txn.store("notes")?
                .insert(json!({"title": "Old", "content": "before tags"}))?;
            Ok(())
        })])
    .unwrap();
    MigrationRunner::new(test.db.clone(), legacy).migrate().await.unwrap();

    let version = test.db.migrate(&catalog::registry().unwrap()).await.unwrap();
    assert_eq!(version, catalog::registry().unwrap().latest_version());

    let records = test
        .db
        .run(|conn| storage::list_records(conn, "notes"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data["tags"], json!([]));
    assert_eq!(records[0].data["content"], "before tags");
}

#[test]
fn stub_uses_the_next_free_version() {
    let registry = catalog::registry().unwrap();
    let stub = registry.stub("add_maps").unwrap();
    let next = registry.next_version();
    assert!(stub.contains(&format!("MigrationStep::no_op({next}, \"add_maps\")")));
    assert!(registry.stub("Add Maps").is_err());
}
