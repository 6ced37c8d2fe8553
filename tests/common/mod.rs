#![allow(dead_code)]

use tempfile::TempDir;

use lorebook::config::DatabaseConfig;
use lorebook::db::Database;
use lorebook::storage;

pub struct TestDb {
    pub db: Database,
    pub config: DatabaseConfig,
    _dir: TempDir,
}

/// A fresh on-disk database in its own temp directory, not yet migrated.
pub async fn open_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("lorebook.db").to_str().unwrap().to_string(),
        ..DatabaseConfig::default()
    };
    let db = Database::open(&config).await.unwrap();
    TestDb {
        db,
        config,
        _dir: dir,
    }
}

/// A fresh database migrated to the built-in schema.
pub async fn boot_db() -> TestDb {
    let test = open_db().await;
    let db = Database::boot(&test.config).await.unwrap();
    TestDb { db, ..test }
}

pub async fn store_exists(db: &Database, store: &str) -> bool {
    let store = store.to_string();
    db.run(move |conn| storage::store_exists(conn, &store))
        .await
        .unwrap()
}

pub async fn exec(db: &Database, sql: &str) {
    use diesel::connection::SimpleConnection;
    let sql = sql.to_string();
    db.run(move |conn| Ok(conn.batch_execute(&sql)?))
        .await
        .unwrap();
}
