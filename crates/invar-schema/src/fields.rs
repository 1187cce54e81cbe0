use serde_json::{json, Value};

use crate::args;

/// Replacement value for sensitive fields when serialized.
pub const MASKED_VALUE: &str = "************";

/// A hardware property slot contributed by a worker or a hardware type.
///
/// Fields are stored on the Hardware as properties and validated at the API
/// layer when added or updated. Two workers cannot share the same field.
#[derive(Debug, Clone)]
pub struct WorkerField {
    pub name: String,
    /// JSON schema validating the field value; defaults to string.
    pub schema: Value,
    /// Default filled into `properties` when the user omits the field.
    pub default: Option<Value>,
    /// Whether the field is required when the worker is in use.
    pub required: bool,
    /// Hidden from serialization for unauthorized users.
    pub private: bool,
    /// Masked when serialized.
    pub sensitive: bool,
    pub description: Option<String>,
}

impl WorkerField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: args::string(),
            default: None,
            required: false,
            private: false,
            sensitive: false,
            description: None,
        }
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Build the `{type: object, properties, required}` schema for a field list.
pub fn worker_fields_schema(fields: &[WorkerField]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.name.clone(), f.schema.clone()))
        .collect();
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
