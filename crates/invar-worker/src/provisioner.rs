use std::time::Duration;

use async_trait::async_trait;
use invar_config::ProvisionerConfig;
use invar_domain::{AvailabilityWindow, Context, Hardware, StateDetails};
use invar_schema::{args, WorkerField};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::http::ServiceClient;
use crate::worker::{HardwareImport, Worker, WorkerResult};

// The provision-state API takes target verbs that differ from the state the
// node ultimately winds up in.
fn state_target(state: &str) -> &'static str {
    match state {
        "manageable" => "manage",
        "available" => "provide",
        other => unreachable!("unsupported provision state target: {other}"),
    }
}

/// Syncs a node record into the provisioning controller and drives its
/// provision state to `available`.
pub struct ProvisionerWorker {
    config: ProvisionerConfig,
    client: ServiceClient,
}

impl ProvisionerWorker {
    pub fn new(config: ProvisionerConfig) -> Self {
        let client = ServiceClient::new(
            "provisioner",
            &config.endpoint,
            config.auth_token.clone(),
        );
        Self { config, client }
    }

    fn desired_node(&self, hardware: &Hardware) -> Value {
        let props = &hardware.properties;
        json!({
            "uuid": hardware.uuid,
            "name": hardware.name,
            "driver": props.get("baremetal_driver"),
            "driver_info": {
                "ipmi_address": props.get("management_address"),
                "ipmi_username": props.get("ipmi_username"),
                "ipmi_password": props.get("ipmi_password"),
                "ipmi_port": props.get("ipmi_port"),
                "ipmi_terminal_port": props.get("ipmi_terminal_port"),
            },
            "resource_class": props.get("resource_class"),
        })
    }

    /// Request a provision-state change and poll until the node reaches it,
    /// bounded by the configured ceiling.
    async fn wait_for_provision_state(
        &self,
        node: Uuid,
        target: &str,
    ) -> Result<(), WorkerError> {
        self.client
            .request(
                Method::PUT,
                &format!("/nodes/{node}/states/provision"),
                Some(&json!({"target": state_target(target)})),
            )
            .await?;

        let deadline = Instant::now() + Duration::from_secs(self.config.provision_state_timeout);
        loop {
            tokio::time::sleep(Duration::from_secs(self.config.poll_interval)).await;
            let doc = self
                .client
                .request(Method::GET, &format!("/nodes/{node}"), None)
                .await?
                .ok_or_else(|| WorkerError::MalformedResponse {
                    service: "provisioner".to_string(),
                    text: "empty node body".to_string(),
                })?;
            if doc["provision_state"] == target {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(WorkerError::ProvisionStateTimeout {
                    node,
                    state: target.to_string(),
                });
            }
        }
    }

    async fn teardown(&self, hardware: &Hardware) -> Result<WorkerResult, WorkerError> {
        self.client
            .request_allow(
                Method::DELETE,
                &format!("/nodes/{}", hardware.uuid),
                None,
                &[404],
            )
            .await?;
        info!(hardware_uuid = %hardware.uuid, "provisioner: removed node");
        let mut payload = StateDetails::new();
        payload.insert("node_created_at".to_string(), Value::Null);
        Ok(WorkerResult::success_with(payload))
    }

    async fn sync(&self, hardware: &Hardware) -> Result<WorkerResult, WorkerError> {
        let desired = self.desired_node(hardware);
        let existing = self
            .client
            .get_or_none(&format!("/nodes/{}", hardware.uuid))
            .await?;

        let Some(existing) = existing else {
            let node = self
                .client
                .request(Method::POST, "/nodes", Some(&desired))
                .await?
                .unwrap_or(Value::Null);
            // A fresh node enrolls, then gets verified on its way to
            // manageable and finally made available for reservations.
            self.wait_for_provision_state(hardware.uuid, "manageable").await?;
            self.wait_for_provision_state(hardware.uuid, "available").await?;
            info!(hardware_uuid = %hardware.uuid, "provisioner: enrolled node");
            return Ok(WorkerResult::success_with(success_payload(&node)));
        };

        if existing["maintenance"] == json!(true) {
            // Avoid mutating anything while an operator holds the node.
            return Ok(WorkerResult::defer(
                "Node is in maintenance mode. Please take the node out of \
                 maintenance to apply this update.",
            ));
        }

        if existing["provision_state"] != "manageable" {
            self.wait_for_provision_state(hardware.uuid, "manageable").await?;
        }

        let mut existing_state = subset_by_keys(&existing, &desired);
        let mut desired_state = desired.clone();
        normalize_driver_info(&mut existing_state, &mut desired_state);

        let patch = json_patch::diff(&existing_state, &desired_state);
        if !patch.0.is_empty() {
            debug!(hardware_uuid = %hardware.uuid, ops = patch.0.len(), "provisioner: patching node");
            self.client
                .request(
                    Method::PATCH,
                    &format!("/nodes/{}", hardware.uuid),
                    Some(&serde_json::to_value(&patch).unwrap_or(Value::Null)),
                )
                .await?;
        }

        self.wait_for_provision_state(hardware.uuid, "available").await?;
        Ok(WorkerResult::success_with(success_payload(&existing)))
    }
}

fn success_payload(node: &Value) -> StateDetails {
    let mut payload = StateDetails::new();
    payload.insert(
        "node_created_at".to_string(),
        node.get("created_at").cloned().unwrap_or(Value::Null),
    );
    payload
}

/// Project `existing` down to the keys present in `desired` so the diff only
/// covers fields this worker owns.
fn subset_by_keys(existing: &Value, desired: &Value) -> Value {
    let Some(keys) = desired.as_object() else {
        return Value::Null;
    };
    let mut out = serde_json::Map::new();
    for key in keys.keys() {
        out.insert(
            key.clone(),
            existing.get(key).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

/// Align `driver_info` maps before diffing: keep unknown downstream keys, and
/// drop keys that are null on both sides so nulls are never sent for fields
/// the controller already has no value for.
fn normalize_driver_info(existing_state: &mut Value, desired_state: &mut Value) {
    let (Some(existing), Some(desired)) = (
        existing_state
            .get_mut("driver_info")
            .and_then(Value::as_object_mut)
            .map(std::mem::take),
        desired_state
            .get_mut("driver_info")
            .and_then(Value::as_object_mut),
    ) else {
        return;
    };

    let mut existing = existing;
    for (key, value) in &existing {
        desired.entry(key.clone()).or_insert_with(|| value.clone());
    }
    let both_null: Vec<String> = desired
        .iter()
        .filter(|(k, v)| {
            v.is_null() && existing.get(*k).map(Value::is_null).unwrap_or(true)
        })
        .map(|(k, _)| k.clone())
        .collect();
    for key in &both_null {
        desired.remove(key);
        existing.remove(key);
    }
    existing_state["driver_info"] = Value::Object(existing);
}

#[async_trait]
impl Worker for ProvisionerWorker {
    fn name(&self) -> &'static str {
        "provisioner"
    }

    fn fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new("baremetal_driver")
                .schema(args::enum_of(&["ipmi"]))
                .default_value(json!("ipmi"))
                .private()
                .description(
                    "The hardware driver that will control this node. \
                     Currently only the 'ipmi' driver is supported.",
                ),
            WorkerField::new("resource_class")
                .default_value(json!("baremetal"))
                .private()
                .description(
                    "The node resource class, used to map launch requests \
                     onto specific nodes.",
                ),
            WorkerField::new("ipmi_username").private(),
            WorkerField::new("ipmi_password").private().sensitive(),
            WorkerField::new("ipmi_port")
                .schema(args::port_range())
                .private()
                .description("The remote IPMI RMCP port; defaults to 623 downstream."),
            WorkerField::new("ipmi_terminal_port")
                .schema(args::port_range())
                .private()
                .description(
                    "A local port used to provide a remote console for \
                     provisioners of the node.",
                ),
        ]
    }

    async fn process(
        &self,
        _context: &Context,
        hardware: &Hardware,
        _availability_windows: &[AvailabilityWindow],
        _state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError> {
        if hardware.deleted {
            return self.teardown(hardware).await;
        }
        match self.sync(hardware).await {
            // The controller holds a node lock during state changes.
            Err(WorkerError::Api { code: 409, .. }) => Ok(WorkerResult::defer("Node is locked.")),
            other => other,
        }
    }

    async fn import_existing(
        &self,
        _context: &Context,
    ) -> Result<Vec<HardwareImport>, WorkerError> {
        let body = self
            .client
            .request(Method::GET, "/nodes", None)
            .await?
            .unwrap_or(Value::Null);
        let nodes = body["nodes"].as_array().cloned().unwrap_or_default();

        let mut imports = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut properties = StateDetails::new();
            if let Some(driver) = node.get("driver").filter(|v| !v.is_null()) {
                properties.insert("baremetal_driver".to_string(), driver.clone());
            }
            if let Some(class) = node.get("resource_class").filter(|v| !v.is_null()) {
                properties.insert("resource_class".to_string(), class.clone());
            }
            imports.push(HardwareImport {
                uuid: node["uuid"].as_str().and_then(|s| Uuid::parse_str(s).ok()),
                name: node["name"].as_str().map(String::from),
                properties,
            });
        }
        Ok(imports)
    }
}
