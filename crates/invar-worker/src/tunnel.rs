use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use invar_config::TunnelConfig;
use invar_domain::{AvailabilityWindow, Context, Hardware, StateDetails};
use invar_schema::WorkerField;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

use crate::error::WorkerError;
use crate::http::ServiceClient;
use crate::worker::{Worker, WorkerResult};

/// Reconciles the hardware's declared overlay channels against the tunnel
/// service: create missing, recreate changed, delete dangling.
pub struct TunnelWorker {
    client: ServiceClient,
}

impl TunnelWorker {
    pub fn new(config: TunnelConfig) -> Self {
        let client = ServiceClient::new("tunnel", &config.endpoint, config.auth_token.clone());
        Self { client }
    }

    /// The per-channel details we persist for device owners to query.
    fn to_state_details(channel: &Value) -> Value {
        json!({
            "uuid": channel["uuid"],
            "peers": channel["peers"]
                .as_array()
                .map(|peers| peers.iter().map(|p| p["properties"].clone()).collect::<Vec<_>>())
                .unwrap_or_default(),
            "endpoint": channel["properties"]["endpoint"],
            "ip": channel["properties"]["ip"],
        })
    }

    fn differs(declared: &Value, channel: &Value) -> bool {
        declared["channel_type"] != channel["channel_type"]
            || declared["public_key"] != channel["properties"]["public_key"]
    }

    async fn delete_channel(&self, channel_uuid: &str) -> Result<(), WorkerError> {
        self.client
            .request_allow(
                Method::DELETE,
                &format!("/channels/{channel_uuid}"),
                None,
                &[404],
            )
            .await?;
        Ok(())
    }

    async fn list_channels(&self) -> Result<HashMap<String, Value>, WorkerError> {
        let body = self
            .client
            .request(Method::GET, "/channels", None)
            .await?
            .unwrap_or(Value::Null);
        Ok(body["channels"]
            .as_array()
            .map(|channels| {
                channels
                    .iter()
                    .filter_map(|c| c["uuid"].as_str().map(|u| (u.to_string(), c.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Worker for TunnelWorker {
    fn name(&self) -> &'static str {
        "tunnel"
    }

    fn fields(&self) -> Vec<WorkerField> {
        Vec::new()
    }

    async fn process(
        &self,
        _context: &Context,
        hardware: &Hardware,
        _availability_windows: &[AvailabilityWindow],
        state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError> {
        // Channel name → stored details from the previous pass.
        let channel_state: HashMap<String, Value> = state_details
            .get("channels")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        if hardware.deleted {
            for stored in channel_state.values() {
                if let Some(uuid) = stored["uuid"].as_str() {
                    self.delete_channel(uuid).await?;
                }
            }
            info!(hardware_uuid = %hardware.uuid, "tunnel: removed channels");
            let mut payload = StateDetails::new();
            payload.insert("channels".to_string(), Value::Null);
            return Ok(WorkerResult::success_with(payload));
        }

        let existing = self.list_channels().await?;
        let declared = hardware
            .properties
            .get("channels")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut new_state = serde_json::Map::new();
        for (name, props) in &declared {
            let stored_uuid = channel_state
                .get(name)
                .and_then(|s| s["uuid"].as_str())
                .map(String::from);

            if let Some(channel) = stored_uuid.as_deref().and_then(|u| existing.get(u)) {
                if !Self::differs(props, channel) {
                    new_state.insert(name.clone(), Self::to_state_details(channel));
                    continue;
                }
                // Representation changed; recreate under new properties.
                self.delete_channel(channel["uuid"].as_str().unwrap_or_default())
                    .await?;
                info!(channel = %name, "tunnel: channel changed, re-creating");
            }

            let created = self
                .client
                .request(
                    Method::POST,
                    "/channels",
                    Some(&json!({
                        "channel_type": props["channel_type"],
                        "properties": {"public_key": props["public_key"]},
                    })),
                )
                .await?
                .ok_or_else(|| WorkerError::MalformedResponse {
                    service: "tunnel".to_string(),
                    text: "empty create-channel body".to_string(),
                })?;
            info!(channel = %name, uuid = %created["uuid"], "tunnel: created channel");
            new_state.insert(name.clone(), Self::to_state_details(&created));
        }

        // Channels recorded on this hardware that exist but are no longer
        // referenced by any declared channel.
        let referenced: HashSet<&str> = new_state
            .values()
            .filter_map(|s| s["uuid"].as_str())
            .collect();
        for stored in channel_state.values() {
            if let Some(uuid) = stored["uuid"].as_str() {
                if existing.contains_key(uuid) && !referenced.contains(uuid) {
                    self.delete_channel(uuid).await?;
                    info!(uuid = %uuid, "tunnel: deleted dangling channel");
                }
            }
        }

        let mut payload = StateDetails::new();
        payload.insert("channels".to_string(), Value::Object(new_state));
        Ok(WorkerResult::success_with(payload))
    }
}
