use invar_domain::DomainError;
use serde_json::{json, Value};

use crate::args;
use crate::fields::{worker_fields_schema, WorkerField};

/// A compiled JSON-Schema validator with trimmed error messages: the full
/// validator output names the whole schema, which is unhelpful in a 400, so
/// only the first violation and its instance location are reported.
pub struct SchemaValidator {
    name: String,
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new(name: impl Into<String>, schema: &Value) -> Result<Self, DomainError> {
        let name = name.into();
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            DomainError::InvalidParameterValue(format!("invalid schema for {name}: {e}"))
        })?;
        Ok(Self { name, validator })
    }

    pub fn validate(&self, instance: &Value) -> Result<(), DomainError> {
        match self.validator.validate(instance) {
            Ok(()) => Ok(()),
            Err(error) => Err(DomainError::InvalidParameterValue(format!(
                "Schema error for {}: {} (at '{}')",
                self.name, error, error.instance_path
            ))),
        }
    }
}

/// One `oneOf` branch of the enroll schema: a hardware type name plus the
/// full property field set it accepts (type defaults + enabled worker fields).
#[derive(Debug, Clone)]
pub struct EnrollBranch {
    pub hardware_type: String,
    pub fields: Vec<WorkerField>,
}

/// Compose the schema validating an enroll request.
///
/// The base object requires `name`, `hardware_type` and `properties`;
/// `project_id` is never accepted from the client (it is set from the
/// authenticated context). The `oneOf` pins `hardware_type` per branch and
/// validates `properties` against that type's composed field set.
pub fn enroll_schema(branches: &[EnrollBranch]) -> Value {
    let one_of: Vec<Value> = branches
        .iter()
        .map(|branch| {
            json!({
                "properties": {
                    "hardware_type": {"const": branch.hardware_type},
                    "properties": worker_fields_schema(&branch.fields),
                },
            })
        })
        .collect();

    json!({
        "type": "object",
        "properties": {
            "name": args::string(),
            "hardware_type": args::string(),
            "properties": {"type": "object"},
        },
        "required": ["name", "hardware_type", "properties"],
        "additionalProperties": false,
        "oneOf": one_of,
    })
}

/// Shape of a PATCH request body: a list of add/replace/remove operations.
pub fn patch_request_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "path": {"type": "string", "pattern": "^(/[\\w-]+)+$"},
                // Only a subset of RFC-6902 operations is supported.
                "op": {"type": "string", "enum": ["add", "replace", "remove"]},
                "value": {},
            },
            "additionalProperties": false,
            "required": ["op", "path"],
        },
    })
}

/// Schema for one availability window inside the patch virtual document.
pub fn window_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "uuid": args::uuid(),
            "hardware_uuid": args::uuid(),
            "start": args::datetime(),
            "end": args::datetime(),
        },
        "required": ["start", "end"],
        "additionalProperties": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_branches() -> Vec<EnrollBranch> {
        vec![EnrollBranch {
            hardware_type: "fake-hardware".into(),
            fields: vec![
                WorkerField::new("default_field"),
                WorkerField::new("default_required_field").required(),
            ],
        }]
    }

    #[test]
    fn enroll_accepts_well_formed_payload() {
        let schema = enroll_schema(&fake_branches());
        let validator = SchemaValidator::new("hardware", &schema).unwrap();
        let payload = json!({
            "name": "n1",
            "hardware_type": "fake-hardware",
            "properties": {"default_required_field": "x"},
        });
        assert!(validator.validate(&payload).is_ok());
    }

    #[test]
    fn enroll_rejects_missing_required_property() {
        let schema = enroll_schema(&fake_branches());
        let validator = SchemaValidator::new("hardware", &schema).unwrap();
        let payload = json!({
            "name": "n1",
            "hardware_type": "fake-hardware",
            "properties": {},
        });
        assert!(validator.validate(&payload).is_err());
    }

    #[test]
    fn enroll_rejects_unknown_hardware_type() {
        let schema = enroll_schema(&fake_branches());
        let validator = SchemaValidator::new("hardware", &schema).unwrap();
        let payload = json!({
            "name": "n1",
            "hardware_type": "no-such-type",
            "properties": {},
        });
        assert!(validator.validate(&payload).is_err());
    }

    #[test]
    fn enroll_rejects_client_supplied_project_id() {
        let schema = enroll_schema(&fake_branches());
        let validator = SchemaValidator::new("hardware", &schema).unwrap();
        let payload = json!({
            "name": "n1",
            "hardware_type": "fake-hardware",
            "properties": {"default_required_field": "x"},
            "project_id": "sneaky",
        });
        assert!(validator.validate(&payload).is_err());
    }

    #[test]
    fn patch_shape_allows_supported_ops_only() {
        let validator = SchemaValidator::new("patch", &patch_request_schema()).unwrap();
        assert!(validator
            .validate(&json!([{"op": "replace", "path": "/name", "value": "n2"}]))
            .is_ok());
        assert!(validator
            .validate(&json!([{"op": "move", "path": "/name", "from": "/x"}]))
            .is_err());
        assert!(validator
            .validate(&json!([{"op": "remove", "path": "no-leading-slash"}]))
            .is_err());
    }

    #[test]
    fn window_requires_start_and_end() {
        let validator = SchemaValidator::new("availability_window", &window_schema()).unwrap();
        assert!(validator
            .validate(&json!({"start": "2026-01-01T00:00:00Z", "end": "2026-01-02T00:00:00Z"}))
            .is_ok());
        assert!(validator.validate(&json!({"start": "2026-01-01T00:00:00Z"})).is_err());
    }
}
