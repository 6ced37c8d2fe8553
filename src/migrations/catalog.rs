use serde_json::Value;

use crate::error::Result;
use crate::indexation::{MENTIONS_STORE, TARGETS_FIELD};
use crate::migrations::{MigrationStep, SchemaRegistry, StoreSchema};

pub fn registry() -> Result<SchemaRegistry> {
    SchemaRegistry::new(vec![
        m0001_init(),
        m0002_mention_index(),
        m0003_bookmarks(),
        m0004_note_tags(),
        m0005_encounter_lookup(),
    ])
}

fn m0001_init() -> MigrationStep {
    MigrationStep::new(1, "init")
        .affects(StoreSchema::new("notes").index("title"))
        .affects(StoreSchema::new("characters").index("name"))
        .affects(StoreSchema::new("monsters").index("name"))
        .affects(StoreSchema::new("parties").index("name"))
        .affects(StoreSchema::new("encounters").index("title"))
}

fn m0002_mention_index() -> MigrationStep {
    MigrationStep::new(2, "mention_index")
        .affects(StoreSchema::new(MENTIONS_STORE).multi_entry(TARGETS_FIELD))
}

fn m0003_bookmarks() -> MigrationStep {
    MigrationStep::new(3, "bookmarks").affects(StoreSchema::new("bookmarks").index("label"))
}

/// Notes written before tags existed get an empty tag list.
fn m0004_note_tags() -> MigrationStep {
    MigrationStep::new(4, "note_tags")
        .affects(StoreSchema::new("notes"))
        .apply(|txn| {
            let updated = txn.store("notes")?.update_each(|data| match data {
                Value::Object(map) if !map.contains_key("tags") => {
                    map.insert("tags".to_string(), Value::Array(Vec::new()));
                    true
                }
                _ => false,
            })?;
            tracing::info!(updated, "backfilled note tags");
            Ok(())
        })
}

fn m0005_encounter_lookup() -> MigrationStep {
    MigrationStep::new(5, "encounter_lookup")
        .affects(StoreSchema::new("encounters").multi_entry("monster_ids"))
        .affects(StoreSchema::new("parties").multi_entry("member_ids"))
}
