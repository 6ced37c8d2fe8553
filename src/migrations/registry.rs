use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{LorebookError, Result};
use crate::migrations::txn::MigrationTxn;
use crate::storage::{is_valid_identifier, StoreSchema};

pub type ApplyFn = Arc<dyn Fn(&mut MigrationTxn<'_>) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct MigrationStep {
    pub version: u32,
    pub name: String,
    pub affected_stores: Vec<StoreSchema>,
    pub(crate) apply: ApplyFn,
    no_op: bool,
}

impl MigrationStep {
    pub fn new(version: u32, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            affected_stores: Vec::new(),
            apply: Arc::new(|_| Ok(())),
            no_op: false,
        }
    }

    /// A step that changes nothing but still advances the installed version.
    pub fn no_op(version: u32, name: impl Into<String>) -> Self {
        Self {
            no_op: true,
            ..Self::new(version, name)
        }
    }

    pub fn affects(mut self, store: StoreSchema) -> Self {
        self.affected_stores.push(store);
        self
    }

    pub fn apply<F>(mut self, apply: F) -> Self
    where
        F: Fn(&mut MigrationTxn<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.apply = Arc::new(apply);
        self
    }

    pub fn is_no_op(&self) -> bool {
        self.no_op
    }

    /// Storage key, zero-padded so keys sort the same way versions do.
    pub fn key(&self) -> String {
        migration_key(self.version, &self.name)
    }

    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.affected_stores.iter().map(|s| s.name.as_str())
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("affected_stores", &self.affected_stores)
            .field("no_op", &self.no_op)
            .finish_non_exhaustive()
    }
}

pub fn migration_key(version: u32, name: &str) -> String {
    format!("{version:04}_{name}")
}

#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    steps: Arc<Vec<MigrationStep>>,
}

impl SchemaRegistry {
    pub fn new(mut steps: Vec<MigrationStep>) -> Result<Self> {
        steps.sort_by_key(|step| step.version);
        validate(&steps)?;
        Ok(Self {
            steps: Arc::new(steps),
        })
    }

    pub fn all_steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn pending(&self, installed: u32) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter().filter(move |step| step.version > installed)
    }

    pub fn latest_version(&self) -> u32 {
        self.steps.last().map(|step| step.version).unwrap_or(0)
    }

    pub fn next_version(&self) -> u32 {
        self.latest_version() + 1
    }

    pub fn stub(&self, name: &str) -> Result<String> {
        if !is_valid_identifier(name) {
            return Err(LorebookError::MigrationConfig(format!(
                "migration name `{name}` must be snake_case"
            )));
        }
        let version = self.next_version();
        let key = migration_key(version, name);
        Ok(format!(
            "pub(super) fn m{key}() -> MigrationStep {{\n    MigrationStep::no_op({version}, \"{name}\")\n}}\n"
        ))
    }
}

fn validate(steps: &[MigrationStep]) -> Result<()> {
    let mut seen = BTreeSet::new();
    let initial = steps.first().map(|step| step.version);
    for step in steps {
        if step.version == 0 {
            return Err(LorebookError::MigrationConfig(format!(
                "migration `{}` uses version 0; versions start at 1",
                step.name
            )));
        }
        if !seen.insert(step.version) {
            return Err(LorebookError::MigrationConfig(format!(
                "duplicate migration version {}",
                step.version
            )));
        }
        if step.name.trim().is_empty() {
            return Err(LorebookError::MigrationConfig(format!(
                "migration {} has an empty name",
                step.version
            )));
        }
        if let Some(ident) = step
            .affected_stores
            .iter()
            .find_map(StoreSchema::invalid_identifier)
        {
            return Err(LorebookError::MigrationConfig(format!(
                "migration {} declares invalid identifier `{ident}`",
                step.version
            )));
        }
        let is_initial = Some(step.version) == initial;
        if !is_initial && step.affected_stores.is_empty() && !step.no_op {
            return Err(LorebookError::MigrationConfig(format!(
                "migration {} ({}) declares no affected stores; mark it as a no-op",
                step.version, step.name
            )));
        }
    }
    Ok(())
}
