pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod indexation;
pub mod mentions;
pub mod migrations;
pub mod notes;
pub mod storage;
pub mod store;

pub use crate::config::Config;
pub use crate::db::Database;
pub use crate::error::{LorebookError, Result};
pub use crate::indexation::IndexationService;
pub use crate::mentions::{extract_mentions, render_mentions, EntityRef};
pub use crate::migrations::{MigrationRunner, MigrationStep, SchemaRegistry, StoreSchema};
pub use crate::notes::{LinkStatus, Notebook};
pub use crate::store::{Entity, EntityStore, Record};
