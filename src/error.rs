use thiserror::Error;

use crate::store::validation::Violation;

#[derive(Debug, Error)]
pub enum LorebookError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("migration table is malformed: {0}")]
    MigrationConfig(String),
    #[error("migration {version} ({name}) failed: {reason}")]
    MigrationApply {
        version: u32,
        name: String,
        reason: String,
    },
    #[error("store `{0}` was not declared as affected by this migration")]
    UndeclaredStore(String),
    #[error("validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),
    #[error("{store} record not found: {id}")]
    NotFound { store: String, id: String },
    #[error("indexation error: {0}")]
    Indexation(String),
    #[error("schema is not ready; run migrations first")]
    SchemaNotReady,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, LorebookError>;

impl From<diesel::result::Error> for LorebookError {
    fn from(err: diesel::result::Error) -> Self {
        LorebookError::Runtime(err.to_string())
    }
}

impl From<serde_json::Error> for LorebookError {
    fn from(err: serde_json::Error) -> Self {
        LorebookError::Serialization(err.to_string())
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
