use std::fmt;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

pub trait Validator: Send + Sync {
    fn validate(&self, payload: &Value) -> Vec<Violation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Integer => "an integer",
            FieldType::Number => "a number",
            FieldType::Boolean => "a boolean",
            FieldType::Array => "an array",
            FieldType::Object => "an object",
        }
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: &'static str,
    kind: FieldType,
    required: bool,
    min_length: Option<usize>,
    items: Option<FieldType>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<FieldRule>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &'static str, kind: FieldType) -> Self {
        self.field(name, kind, true)
    }

    pub fn optional(self, name: &'static str, kind: FieldType) -> Self {
        self.field(name, kind, false)
    }

    /// Requires a string of at least `min` characters after trimming.
    pub fn required_text(mut self, name: &'static str, min: usize) -> Self {
        self = self.field(name, FieldType::String, true);
        if let Some(rule) = self.fields.last_mut() {
            rule.min_length = Some(min);
        }
        self
    }

    /// An array whose elements must all be `items`; missing is a violation only
    /// when `required` is set.
    pub fn array_of(mut self, name: &'static str, items: FieldType, required: bool) -> Self {
        self = self.field(name, FieldType::Array, required);
        if let Some(rule) = self.fields.last_mut() {
            rule.items = Some(items);
        }
        self
    }

    fn field(mut self, name: &'static str, kind: FieldType, required: bool) -> Self {
        self.fields.push(FieldRule {
            name,
            kind,
            required,
            min_length: None,
            items: None,
        });
        self
    }
}

impl Validator for ObjectSchema {
    fn validate(&self, payload: &Value) -> Vec<Violation> {
        let Some(object) = payload.as_object() else {
            return vec![Violation::new("payload", "must be an object")];
        };

        let mut violations = Vec::new();
        for rule in &self.fields {
            match object.get(rule.name) {
                None | Some(Value::Null) => {
                    if rule.required {
                        violations.push(Violation::new(rule.name, "is required"));
                    }
                }
                Some(value) if !rule.kind.matches(value) => {
                    violations.push(Violation::new(
                        rule.name,
                        format!("must be {}", rule.kind.describe()),
                    ));
                }
                Some(value) => {
                    if let (Some(min), Some(text)) = (rule.min_length, value.as_str()) {
                        if text.trim().chars().count() < min {
                            violations.push(Violation::new(
                                rule.name,
                                format!("must be at least {min} characters"),
                            ));
                        }
                    }
                    if let (Some(items), Some(array)) = (rule.items, value.as_array()) {
                        if array.iter().any(|item| !items.matches(item)) {
                            violations.push(Violation::new(
                                rule.name,
                                format!("must only contain {} values", items.describe()),
                            ));
                        }
                    }
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ObjectSchema {
        ObjectSchema::new()
            .required_text("name", 1)
            .required("level", FieldType::Integer)
            .optional("notes", FieldType::String)
            .array_of("tags", FieldType::String, false)
    }

    #[test]
    fn accepts_valid_payload() {
        let payload = json!({"name": "Vex", "level": 3, "tags": ["rogue"]});
        assert!(schema().validate(&payload).is_empty());
    }

    #[test]
    fn reports_missing_and_mistyped_fields() {
        let payload = json!({"name": "  ", "level": "three", "tags": ["ok", 4]});
        let violations = schema().validate(&payload);
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "level", "tags"]);
    }

    #[test]
    fn null_counts_as_missing() {
        let violations = schema().validate(&json!({"name": "Vex", "level": null}));
        assert_eq!(violations, vec![Violation::new("level", "is required")]);
    }

    #[test]
    fn missing_array_depends_on_required_flag() {
        let optional = ObjectSchema::new().array_of("ids", FieldType::String, false);
        assert!(optional.validate(&json!({})).is_empty());

        let required = ObjectSchema::new().array_of("ids", FieldType::String, true);
        assert_eq!(
            required.validate(&json!({})),
            vec![Violation::new("ids", "is required")]
        );
        assert!(required.validate(&json!({"ids": []})).is_empty());
    }

    #[test]
    fn non_objects_are_rejected() {
        assert_eq!(schema().validate(&json!([1, 2])).len(), 1);
    }
}
