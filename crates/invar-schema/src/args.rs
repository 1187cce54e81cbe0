//! JSON-Schema fragment helpers used by worker field declarations and the
//! composed request schemas.

use serde_json::{json, Value};

pub fn string() -> Value {
    json!({"type": "string"})
}

pub fn integer() -> Value {
    json!({"type": "integer"})
}

pub fn number() -> Value {
    json!({"type": "number"})
}

pub fn boolean() -> Value {
    json!({"type": "boolean"})
}

pub fn datetime() -> Value {
    json!({"type": "string", "format": "date-time"})
}

pub fn uuid() -> Value {
    json!({"type": "string", "format": "uuid"})
}

pub fn email() -> Value {
    json!({"type": "string", "format": "email"})
}

pub fn port_range() -> Value {
    json!({"type": "integer", "minimum": 1, "maximum": 65536})
}

pub fn host_or_ip() -> Value {
    json!({
        "anyOf": [
            {"type": "string", "format": "hostname"},
            {"type": "string", "format": "ipv4"},
            {"type": "string", "format": "ipv6"},
        ]
    })
}

pub fn cpu_arch() -> Value {
    enum_of(&["x86_64", "aarch64"])
}

pub fn enum_of(values: &[&str]) -> Value {
    json!({"type": "string", "enum": values})
}

pub fn optional(schema: Value) -> Value {
    json!({"anyOf": [schema, {"type": "null"}]})
}

pub fn array_of(schema: Value, min_items: usize) -> Value {
    json!({"type": "array", "items": schema, "minItems": min_items})
}
