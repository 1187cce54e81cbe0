use std::collections::HashMap;

use async_trait::async_trait;
use invar_config::ReservationConfig;
use invar_domain::{AvailabilityWindow, Context, Hardware, StateDetails};
use invar_schema::{args, WorkerField};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::http::ServiceClient;
use crate::worker::{HardwareImport, Worker, WorkerResult};

/// Wire format the reservation service uses for lease dates. Minute
/// precision; window instants round-trip through this.
pub const LEASE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

const LEASE_NAME_PREFIX: &str = "availability:";

fn placement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "rack": args::string(),
            "node": args::string(),
        },
        "additionalProperties": false,
    })
}

/// Syncs the bookable resource record and reconciles availability windows as
/// leases in the reservation service.
pub struct ReservationWorker {
    client: ServiceClient,
}

impl ReservationWorker {
    pub fn new(config: ReservationConfig) -> Self {
        let client =
            ServiceClient::new("reservation", &config.endpoint, config.auth_token.clone());
        Self { client }
    }

    /// The resource document the reservation service should hold for this
    /// hardware. Nulled-out fields are skipped; the downstream API errors on
    /// explicit nulls and cannot delete extra capabilities anyway.
    fn expected_resource(&self, hardware: &Hardware) -> Value {
        let props = &hardware.properties;
        let mut doc = serde_json::Map::new();
        doc.insert("uid".to_string(), json!(hardware.uuid));
        doc.insert("node_name".to_string(), json!(hardware.name));
        for key in ["node_type", "cpu_arch", "su_factor"] {
            if let Some(value) = props.get(key).filter(|v| !v.is_null()) {
                doc.insert(key.to_string(), value.clone());
            }
        }
        if let Some(placement) = props.get("placement").and_then(Value::as_object) {
            for key in ["node", "rack"] {
                if let Some(value) = placement.get(key).filter(|v| !v.is_null()) {
                    doc.insert(format!("placement.{key}"), value.clone());
                }
            }
        }
        Value::Object(doc)
    }

    fn reservation_values(hardware_uuid: Uuid) -> Value {
        json!({
            "resource_type": "physical:host",
            "min": 1,
            "max": 1,
            "resource_properties": format!("[\"==\",\"$uid\",\"{hardware_uuid}\"]"),
        })
    }

    async fn teardown(
        &self,
        hardware: &Hardware,
        state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError> {
        if let Some(leases) = state_details.get("leases").and_then(Value::as_object) {
            for lease_id in leases.values().filter_map(Value::as_str) {
                self.client
                    .request_allow(Method::DELETE, &format!("/leases/{lease_id}"), None, &[404])
                    .await?;
            }
        }
        if let Some(resource_id) = state_details.get("resource_id").and_then(Value::as_str) {
            self.client
                .request_allow(
                    Method::DELETE,
                    &format!("/resources/{resource_id}"),
                    None,
                    &[404],
                )
                .await?;
        }
        info!(hardware_uuid = %hardware.uuid, "reservation: released resource and leases");
        let mut payload = StateDetails::new();
        payload.insert("resource_id".to_string(), Value::Null);
        payload.insert("leases".to_string(), Value::Null);
        Ok(WorkerResult::success_with(payload))
    }

    async fn sync_resource(&self, hardware: &Hardware) -> Result<String, WorkerError> {
        let desired = self.expected_resource(hardware);
        let existing = self
            .client
            .get_or_none(&format!("/resources/{}", hardware.uuid))
            .await?;

        match existing {
            None => {
                let created = self
                    .client
                    .request(Method::POST, "/resources", Some(&desired))
                    .await?
                    .ok_or_else(|| WorkerError::MalformedResponse {
                        service: "reservation".to_string(),
                        text: "empty create-resource body".to_string(),
                    })?;
                info!(hardware_uuid = %hardware.uuid, "reservation: created resource");
                Ok(created["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| hardware.uuid.to_string()))
            }
            Some(existing) => {
                let changed: serde_json::Map<String, Value> = desired
                    .as_object()
                    .map(|d| {
                        d.iter()
                            .filter(|(k, v)| existing.get(*k) != Some(v))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                if !changed.is_empty() {
                    self.client
                        .request(
                            Method::PUT,
                            &format!("/resources/{}", hardware.uuid),
                            Some(&Value::Object(changed)),
                        )
                        .await?;
                }
                Ok(existing["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| hardware.uuid.to_string()))
            }
        }
    }

    /// Reconcile the hardware's availability windows against the lease set:
    /// create missing leases, update leases whose dates drifted, and delete
    /// leases for windows that no longer exist.
    async fn sync_leases(
        &self,
        hardware: &Hardware,
        windows: &[AvailabilityWindow],
    ) -> Result<serde_json::Map<String, Value>, WorkerError> {
        let body = self
            .client
            .request(Method::GET, "/leases", None)
            .await?
            .unwrap_or(Value::Null);
        let remote: HashMap<String, Value> = body["leases"]
            .as_array()
            .map(|leases| {
                leases
                    .iter()
                    .filter_map(|l| l["name"].as_str().map(|n| (n.to_string(), l.clone())))
                    .collect()
            })
            .unwrap_or_default();

        let mut lease_state = serde_json::Map::new();
        for window in windows {
            let name = format!("{LEASE_NAME_PREFIX}{}", window.uuid);
            let start = window.start.format(LEASE_DATE_FORMAT).to_string();
            let end = window.end.format(LEASE_DATE_FORMAT).to_string();

            match remote.get(&name) {
                Some(lease) => {
                    let lease_id = lease["id"].as_str().unwrap_or_default().to_string();
                    if lease["start_date"] != json!(start) || lease["end_date"] != json!(end) {
                        self.client
                            .request(
                                Method::PUT,
                                &format!("/leases/{lease_id}"),
                                Some(&json!({"start_date": start, "end_date": end})),
                            )
                            .await?;
                    }
                    lease_state.insert(window.uuid.to_string(), json!(lease_id));
                }
                None => {
                    let lease = self
                        .client
                        .request(
                            Method::POST,
                            "/leases",
                            Some(&json!({
                                "name": name,
                                "start_date": start,
                                "end_date": end,
                                "reservations": [Self::reservation_values(hardware.uuid)],
                            })),
                        )
                        .await?
                        .unwrap_or(Value::Null);
                    lease_state.insert(
                        window.uuid.to_string(),
                        lease["id"].clone(),
                    );
                }
            }
        }

        // Leases we created for windows that have since been removed.
        let current: Vec<String> = windows.iter().map(|w| w.uuid.to_string()).collect();
        for (name, lease) in &remote {
            let Some(window_uuid) = name.strip_prefix(LEASE_NAME_PREFIX) else {
                continue;
            };
            let ours = lease["reservations"]
                .as_array()
                .map(|rs| {
                    rs.iter().any(|r| {
                        r["resource_properties"]
                            .as_str()
                            .map(|p| p.contains(&hardware.uuid.to_string()))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if ours && !current.iter().any(|u| u == window_uuid) {
                if let Some(lease_id) = lease["id"].as_str() {
                    self.client
                        .request_allow(
                            Method::DELETE,
                            &format!("/leases/{lease_id}"),
                            None,
                            &[404],
                        )
                        .await?;
                }
            }
        }

        Ok(lease_state)
    }
}

#[async_trait]
impl Worker for ReservationWorker {
    fn name(&self) -> &'static str {
        "reservation"
    }

    fn fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new("node_type")
                .description("A high-level classification of the type of node."),
            WorkerField::new("placement")
                .schema(placement_schema())
                .description("Information about the physical placement of the node."),
            WorkerField::new("su_factor")
                .schema(args::number())
                .default_value(json!(1.0))
                .description("The service unit (SU) hourly cost of the resource."),
        ]
    }

    async fn process(
        &self,
        _context: &Context,
        hardware: &Hardware,
        availability_windows: &[AvailabilityWindow],
        state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError> {
        if hardware.deleted {
            return self.teardown(hardware, state_details).await;
        }

        let resource_id = self.sync_resource(hardware).await?;
        let lease_state = self.sync_leases(hardware, availability_windows).await?;

        let mut payload = StateDetails::new();
        payload.insert("resource_id".to_string(), json!(resource_id));
        payload.insert("leases".to_string(), Value::Object(lease_state));
        Ok(WorkerResult::success_with(payload))
    }

    async fn import_existing(
        &self,
        _context: &Context,
    ) -> Result<Vec<HardwareImport>, WorkerError> {
        let body = self
            .client
            .request(Method::GET, "/resources", None)
            .await?
            .unwrap_or(Value::Null);
        let resources = body["resources"].as_array().cloned().unwrap_or_default();

        let mut imports = Vec::with_capacity(resources.len());
        for resource in resources {
            let mut properties = StateDetails::new();
            for key in ["node_type", "su_factor"] {
                if let Some(value) = resource.get(key).filter(|v| !v.is_null()) {
                    properties.insert(key.to_string(), value.clone());
                }
            }
            let mut placement = serde_json::Map::new();
            for key in ["node", "rack"] {
                if let Some(value) = resource.get(&format!("placement.{key}")) {
                    if !value.is_null() {
                        placement.insert(key.to_string(), value.clone());
                    }
                }
            }
            if !placement.is_empty() {
                properties.insert("placement".to_string(), Value::Object(placement));
            }
            imports.push(HardwareImport {
                uuid: resource["uid"].as_str().and_then(|s| Uuid::parse_str(s).ok()),
                name: resource["node_name"].as_str().map(String::from),
                properties,
            });
        }
        Ok(imports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn worker_for(server: &MockServer) -> ReservationWorker {
        ReservationWorker::new(ReservationConfig {
            endpoint: server.uri(),
            auth_token: None,
        })
    }

    fn reservable_hardware() -> Hardware {
        let mut properties = Map::new();
        properties.insert("node_type".into(), json!("compute"));
        properties.insert("su_factor".into(), json!(1.0));
        Hardware {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "node-1".into(),
            project_id: "p1".into(),
            hardware_type: "baremetal".into(),
            properties,
            created_at: Utc::now(),
            updated_at: None,
            deleted: false,
            deleted_at: None,
        }
    }

    fn window_for(hw: &Hardware) -> AvailabilityWindow {
        AvailabilityWindow {
            id: 1,
            uuid: Uuid::new_v4(),
            hardware_uuid: hw.uuid,
            start: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 8, 9, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn creates_resource_and_lease_for_window() {
        let server = MockServer::start().await;
        let hw = reservable_hardware();
        let window = window_for(&hw);

        Mock::given(method("GET"))
            .and(path(format!("/resources/{}", hw.uuid)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/resources"))
            .and(body_partial_json(json!({"node_name": "node-1", "node_type": "compute"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "r-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/leases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"leases": []})))
            .mount(&server)
            .await;
        // Lease dates are minute-precision strings.
        Mock::given(method("POST"))
            .and(path("/leases"))
            .and(body_partial_json(json!({
                "name": format!("availability:{}", window.uuid),
                "start_date": "2026-03-01 09:30",
                "end_date": "2026-03-08 09:30",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "l-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let result = worker_for(&server)
            .process(&Context::admin(), &hw, &[window.clone()], &Map::new())
            .await
            .unwrap();
        match result {
            WorkerResult::Success { payload } => {
                assert_eq!(payload["resource_id"], json!("r-1"));
                assert_eq!(payload["leases"][window.uuid.to_string()], json!("l-1"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn removes_lease_for_dropped_window() {
        let server = MockServer::start().await;
        let hw = reservable_hardware();
        let gone_window = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/resources/{}", hw.uuid)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "r-1",
                "uid": hw.uuid,
                "node_name": "node-1",
                "node_type": "compute",
                "su_factor": 1.0,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/leases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "leases": [{
                    "id": "l-stale",
                    "name": format!("availability:{gone_window}"),
                    "start_date": "2026-03-01 09:30",
                    "end_date": "2026-03-08 09:30",
                    "reservations": [{
                        "resource_properties": format!("[\"==\",\"$uid\",\"{}\"]", hw.uuid),
                    }],
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/leases/l-stale"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let result = worker_for(&server)
            .process(&Context::admin(), &hw, &[], &Map::new())
            .await
            .unwrap();
        assert!(matches!(result, WorkerResult::Success { .. }));
    }

    #[tokio::test]
    async fn deleted_hardware_releases_everything() {
        let server = MockServer::start().await;
        let mut hw = reservable_hardware();
        hw.deleted = true;
        let mut details = Map::new();
        details.insert("resource_id".into(), json!("r-1"));
        details.insert("leases".into(), json!({"w-1": "l-1"}));

        Mock::given(method("DELETE"))
            .and(path("/leases/l-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/resources/r-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let result = worker_for(&server)
            .process(&Context::admin(), &hw, &[], &details)
            .await
            .unwrap();
        match result {
            WorkerResult::Success { payload } => {
                assert!(payload["resource_id"].is_null());
                assert!(payload["leases"].is_null());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
