use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mentions::EntityRef;
use crate::store::validation::{FieldType, ObjectSchema, Validator};
use crate::store::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
        }
    }
}

impl Record for Note {
    const STORE: &'static str = "notes";
    const KIND: &'static str = "note";

    fn validator() -> Arc<dyn Validator> {
        Arc::new(
            ObjectSchema::new()
                .required_text("title", 1)
                .required("content", FieldType::String)
                .array_of("tags", FieldType::String, false),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl Record for Character {
    const STORE: &'static str = "characters";
    const KIND: &'static str = "character";

    fn validator() -> Arc<dyn Validator> {
        Arc::new(
            ObjectSchema::new()
                .required_text("name", 1)
                .required("level", FieldType::Integer)
                .optional("class", FieldType::String),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monster {
    pub name: String,
    pub challenge: f64,
    pub hit_points: u32,
}

impl Record for Monster {
    const STORE: &'static str = "monsters";
    const KIND: &'static str = "monster";

    fn validator() -> Arc<dyn Validator> {
        Arc::new(
            ObjectSchema::new()
                .required_text("name", 1)
                .required("challenge", FieldType::Number)
                .required("hit_points", FieldType::Integer),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl Record for Party {
    const STORE: &'static str = "parties";
    const KIND: &'static str = "party";

    fn validator() -> Arc<dyn Validator> {
        Arc::new(
            ObjectSchema::new()
                .required_text("name", 1)
                .array_of("member_ids", FieldType::String, false),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub title: String,
    #[serde(default)]
    pub monster_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_id: Option<String>,
}

impl Record for Encounter {
    const STORE: &'static str = "encounters";
    const KIND: &'static str = "encounter";

    fn validator() -> Arc<dyn Validator> {
        Arc::new(
            ObjectSchema::new()
                .required_text("title", 1)
                .array_of("monster_ids", FieldType::String, false)
                .optional("party_id", FieldType::String),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub label: String,
    pub target: EntityRef,
}

impl Record for Bookmark {
    const STORE: &'static str = "bookmarks";
    const KIND: &'static str = "bookmark";

    fn validator() -> Arc<dyn Validator> {
        Arc::new(
            ObjectSchema::new()
                .required_text("label", 1)
                .required("target", FieldType::Object),
        )
    }
}
