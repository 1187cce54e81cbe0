use std::collections::HashMap;

use async_trait::async_trait;
use invar_config::OrchestratorConfig;
use invar_domain::{AvailabilityWindow, Context, Hardware, StateDetails};
use invar_schema::WorkerField;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

use crate::error::WorkerError;
use crate::http::ServiceClient;
use crate::worker::{Worker, WorkerResult};

/// Applies the configured labels to the cluster node matching the hardware.
pub struct OrchestratorWorker {
    config: OrchestratorConfig,
    client: ServiceClient,
}

impl OrchestratorWorker {
    pub fn new(config: OrchestratorConfig) -> Self {
        let client = ServiceClient::new(
            "orchestrator",
            &config.endpoint,
            config.auth_token.clone(),
        );
        Self { config, client }
    }

    /// Expand `key1=value1|key2=value2` into a label map.
    fn expected_labels(&self, index: &str) -> HashMap<String, String> {
        let Some(spec) = self.config.expected_labels.get(index) else {
            return HashMap::new();
        };
        spec.split('|')
            .filter_map(|pair| {
                pair.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }

    fn labels_for(&self, hardware: &Hardware) -> Result<HashMap<String, String>, WorkerError> {
        let index_property = &self.config.expected_labels_index_property;
        let index = hardware
            .properties
            .get(index_property)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WorkerError::Invalid(format!(
                    "Missing {index_property} on hardware {}",
                    hardware.uuid
                ))
            })?;
        Ok(self.expected_labels(index))
    }

    async fn patch_node_labels(
        &self,
        node_name: &str,
        labels: &serde_json::Map<String, Value>,
    ) -> Result<u16, WorkerError> {
        let (status, _) = self
            .client
            .request_allow(
                Method::PATCH,
                &format!("/nodes/{node_name}"),
                Some(&json!({"metadata": {"labels": labels}})),
                &[404],
            )
            .await?;
        Ok(status)
    }
}

#[async_trait]
impl Worker for OrchestratorWorker {
    fn name(&self) -> &'static str {
        "orchestrator"
    }

    fn fields(&self) -> Vec<WorkerField> {
        Vec::new()
    }

    async fn process(
        &self,
        _context: &Context,
        hardware: &Hardware,
        _availability_windows: &[AvailabilityWindow],
        _state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError> {
        if hardware.deleted {
            // Strip the managed labels; a 404 means the node already left the
            // cluster.
            let labels = self.labels_for(hardware).unwrap_or_default();
            if !labels.is_empty() {
                let nulled: serde_json::Map<String, Value> =
                    labels.keys().map(|k| (k.clone(), Value::Null)).collect();
                self.patch_node_labels(&hardware.name, &nulled).await?;
            }
            info!(hardware_uuid = %hardware.uuid, "orchestrator: removed node labels");
            let mut payload = StateDetails::new();
            payload.insert("num_labels".to_string(), Value::Null);
            return Ok(WorkerResult::success_with(payload));
        }

        let labels = self.labels_for(hardware)?;
        let mut payload = StateDetails::new();
        if labels.is_empty() {
            payload.insert("num_labels".to_string(), json!(0));
            return Ok(WorkerResult::success_with(payload));
        }

        let label_doc: serde_json::Map<String, Value> = labels
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let status = self.patch_node_labels(&hardware.name, &label_doc).await?;
        if status == 404 {
            return Ok(WorkerResult::defer("No matching cluster node found"));
        }

        payload.insert("num_labels".to_string(), json!(labels.len()));
        Ok(WorkerResult::success_with(payload))
    }
}
