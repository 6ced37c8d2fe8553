use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{LorebookError, Result};

pub const DB_PATH_ENV: &str = "LOREBOOK_DB";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| LorebookError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| LorebookError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    pub fn with_env(mut self) -> Self {
        if let Ok(value) = std::env::var(DB_PATH_ENV) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.database.path = trimmed.to_string();
            }
        }
        self
    }

    pub fn log_filter(&self) -> &str {
        self.logging
            .filter
            .as_deref()
            .unwrap_or("info,lorebook=info")
    }
}

pub fn default_db_path() -> String {
    "./data/lorebook.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"logging\": {{\"filter\": \"debug\"}}}}").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database.path, default_db_path());
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, LorebookError::Config(_)));
    }
}
