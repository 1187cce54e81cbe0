use std::collections::HashMap;

use invar_domain::{AvailabilityWindow, Hardware, WorkerTask};
use invar_schema::{WorkerField, MASKED_VALUE};
use invar_worker::DriverRegistry;
use serde_json::{json, Map, Value};

/// Serialize a hardware for an API response.
///
/// Private fields are omitted for non-admins; sensitive fields are always
/// masked. Properties no longer declared by any field are hidden from
/// everyone but admins.
pub fn hardware_response(hardware: &Hardware, registry: &DriverRegistry, admin: bool) -> Value {
    let fields: HashMap<String, WorkerField> = registry
        .fields_for(&hardware.hardware_type)
        .map(|fields| fields.into_iter().map(|f| (f.name.clone(), f)).collect())
        .unwrap_or_default();

    let mut properties = Map::new();
    for (key, value) in &hardware.properties {
        match fields.get(key) {
            Some(field) if field.private && !admin => continue,
            Some(field) if field.sensitive => {
                properties.insert(key.clone(), json!(MASKED_VALUE));
            }
            Some(_) => {
                properties.insert(key.clone(), value.clone());
            }
            None if admin => {
                properties.insert(key.clone(), value.clone());
            }
            None => continue,
        }
    }

    json!({
        "uuid": hardware.uuid,
        "name": hardware.name,
        "project_id": hardware.project_id,
        "hardware_type": hardware.hardware_type,
        "properties": properties,
        "created_at": hardware.created_at,
        "updated_at": hardware.updated_at,
    })
}

pub fn worker_summary(tasks: &[WorkerTask]) -> Value {
    json!(tasks
        .iter()
        .map(|t| {
            json!({
                "worker_type": t.worker_type,
                "state": t.state,
                "state_details": t.state_details,
            })
        })
        .collect::<Vec<_>>())
}

pub fn window_response(window: &AvailabilityWindow) -> Value {
    json!({
        "uuid": window.uuid,
        "start": window.start,
        "end": window.end,
    })
}
