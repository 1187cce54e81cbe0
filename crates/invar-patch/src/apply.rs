use chrono::{DateTime, Utc};
use invar_domain::{AvailabilityWindow, DomainError, Hardware};
use invar_schema::{window_schema, SchemaValidator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Root fields a patch may touch. Everything else on the virtual document is
/// read-only.
const PATCHABLE_ROOT_FIELDS: &[&str] = &["name", "hardware_type", "properties", "availability"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Replace,
    Remove,
}

/// One operation from a PATCH request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    fn patch_error(&self, reason: impl std::fmt::Display) -> DomainError {
        DomainError::Patch {
            patch: serde_json::to_string(self).unwrap_or_else(|_| self.path.clone()),
            reason: reason.to_string(),
        }
    }

    fn root_segment(&self) -> &str {
        self.path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }

    fn depth(&self) -> usize {
        self.path.trim_start_matches('/').split('/').count()
    }
}

/// Window mutations produced by a patch, persisted together with the
/// hardware update in one transaction.
#[derive(Debug, Clone, Default)]
pub struct WindowChanges {
    pub to_add: Vec<AvailabilityWindow>,
    pub to_update: Vec<AvailabilityWindow>,
    pub to_remove: Vec<Uuid>,
}

impl WindowChanges {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// The result of applying a patch: the changed hardware fields plus the
/// window diff.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub name: Option<String>,
    pub properties: Option<Map<String, Value>>,
    pub windows: WindowChanges,
    /// The patched virtual document, serialized back to the caller.
    pub document: Value,
}

/// Build the virtual document a patch operates on. The hardware's own fields
/// sit at the root; windows are addressed by UUID under `/availability`.
pub fn assemble_document(hardware: &Hardware, windows: &[AvailabilityWindow]) -> Value {
    let availability: Map<String, Value> = windows
        .iter()
        .map(|w| {
            (
                w.uuid.to_string(),
                json!({"start": w.start, "end": w.end}),
            )
        })
        .collect();
    json!({
        "uuid": hardware.uuid,
        "name": hardware.name,
        "project_id": hardware.project_id,
        "hardware_type": hardware.hardware_type,
        "properties": hardware.properties,
        "availability": availability,
    })
}

/// Apply `ops` to the virtual document for `hardware` one operation at a
/// time, so an error names the offending op, then diff the result against
/// the original state.
pub fn apply_patch(
    hardware: &Hardware,
    windows: &[AvailabilityWindow],
    ops: &[PatchOp],
) -> Result<PatchOutcome, DomainError> {
    let mut doc = assemble_document(hardware, windows);

    for op in ops {
        let op = normalize_op(&doc, op)?;
        let patch: json_patch::Patch = serde_json::from_value(json!([&op]))
            .map_err(|e| op.patch_error(e))?;
        json_patch::patch(&mut doc, &patch.0).map_err(|e| op.patch_error(e))?;
    }

    diff_document(hardware, windows, doc)
}

/// Validate an op against the allowed-fields rules and rewrite the window
/// append path to a concrete server-generated UUID.
fn normalize_op(doc: &Value, op: &PatchOp) -> Result<PatchOp, DomainError> {
    let root = op.root_segment();
    if root.is_empty() {
        return Err(op.patch_error("empty path"));
    }

    if !PATCHABLE_ROOT_FIELDS.contains(&root) {
        if op.op == PatchOpKind::Add && op.depth() == 1 && doc.get(root).is_none() {
            return Err(op.patch_error(format!(
                "Adding a new attribute (/{root}) to the root of the resource is not allowed"
            )));
        }
        return Err(op.patch_error(format!("/{root} is not a patchable field")));
    }

    // The type of a hardware item is fixed at enroll time.
    if root == "hardware_type" {
        return Err(op.patch_error("hardware_type cannot be changed after enroll"));
    }

    let mut op = op.clone();
    if op.path == "/availability/-" {
        if op.op != PatchOpKind::Add {
            return Err(op.patch_error("'-' is only valid when adding a new window"));
        }
        op.path = format!("/availability/{}", Uuid::new_v4());
    }
    Ok(op)
}

fn parse_window_instant(op_desc: &str, value: &Value) -> Result<DateTime<Utc>, DomainError> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            DomainError::InvalidParameterValue(format!(
                "invalid {op_desc} instant in availability window: {value}"
            ))
        })
}

fn diff_document(
    hardware: &Hardware,
    windows: &[AvailabilityWindow],
    doc: Value,
) -> Result<PatchOutcome, DomainError> {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            DomainError::InvalidParameterValue("patched document must keep a non-empty name".into())
        })?
        .to_string();
    let properties = doc
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            DomainError::InvalidParameterValue("patched properties must be an object".into())
        })?
        .clone();
    let availability = doc
        .get("availability")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            DomainError::InvalidParameterValue("patched availability must be an object".into())
        })?
        .clone();

    let window_validator = SchemaValidator::new("availability_window", &window_schema())?;

    let mut changes = WindowChanges::default();
    for (key, value) in &availability {
        let window_uuid = Uuid::parse_str(key).map_err(|_| {
            DomainError::InvalidParameterValue(format!(
                "availability windows are addressed by UUID, got '{key}'"
            ))
        })?;
        window_validator.validate(value)?;
        let start = parse_window_instant("start", &value["start"])?;
        let end = parse_window_instant("end", &value["end"])?;
        if end <= start {
            return Err(DomainError::InvalidParameterValue(format!(
                "availability window {window_uuid} must end after it starts"
            )));
        }

        match windows.iter().find(|w| w.uuid == window_uuid) {
            None => changes.to_add.push(AvailabilityWindow {
                id: 0,
                uuid: window_uuid,
                hardware_uuid: hardware.uuid,
                start,
                end,
            }),
            Some(existing) if existing.start != start || existing.end != end => {
                changes.to_update.push(AvailabilityWindow {
                    id: existing.id,
                    uuid: existing.uuid,
                    hardware_uuid: existing.hardware_uuid,
                    start,
                    end,
                });
            }
            Some(_) => {}
        }
    }
    for window in windows {
        if !availability.contains_key(&window.uuid.to_string()) {
            changes.to_remove.push(window.uuid);
        }
    }

    Ok(PatchOutcome {
        name: (name != hardware.name).then_some(name),
        properties: (properties != hardware.properties).then_some(properties),
        windows: changes,
        document: doc,
    })
}
