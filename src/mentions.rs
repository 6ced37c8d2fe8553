use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LorebookError, Result};

// `[[kind:id]]` or `[[kind:id|label]]`; anything else is ordinary text.
static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[([a-z][a-z0-9_-]*):([A-Za-z0-9_-]+)(?:\|[^\[\]\n]*)?\]\]")
        .expect("valid mention pattern")
});
static KIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid kind pattern"));
static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid id pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| LorebookError::Serialization(format!("`{value}` is not kind:id")))?;
        let parsed = Self::new(kind, id);
        if !parsed.is_valid() {
            return Err(LorebookError::Serialization(format!(
                "`{value}` is not a valid entity reference"
            )));
        }
        Ok(parsed)
    }

    pub fn is_valid(&self) -> bool {
        KIND_RE.is_match(&self.kind) && ID_RE.is_match(&self.id)
    }

    pub fn to_mention(&self) -> String {
        format!("[[{}:{}]]", self.kind, self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Every distinct reference in `text`, in order of first occurrence.
pub fn extract_mentions(text: &str) -> Vec<EntityRef> {
    let mut seen = HashSet::new();
    MENTION_RE
        .captures_iter(text)
        .map(|cap| EntityRef::new(&cap[1], &cap[2]))
        .filter(|mention| seen.insert(mention.clone()))
        .collect()
}

pub fn render_mentions(refs: &[EntityRef]) -> String {
    refs.iter()
        .map(EntityRef::to_mention)
        .collect::<Vec<_>>()
        .join(" ")
}
