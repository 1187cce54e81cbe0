use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level service configuration, deserialized from a single YAML file.
///
/// Every field has a serde default so an empty (or absent) file yields a
/// usable local configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Node identifier. An opaque name, not necessarily a hostname.
    pub host: String,
    pub enabled_hardware_types: Vec<String>,
    pub enabled_worker_types: Vec<String>,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    /// Static bearer-token table consumed by the in-tree authenticator.
    pub auth: HashMap<String, AuthTokenEntry>,
    pub provisioner: ProvisionerConfig,
    pub reservation: ReservationConfig,
    pub orchestrator: OrchestratorConfig,
    pub tunnel: TunnelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "invar".to_string(),
            enabled_hardware_types: vec!["fake-hardware".to_string()],
            enabled_worker_types: vec!["fake-worker".to_string()],
            worker: WorkerConfig::default(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            auth: HashMap::new(),
            provisioner: ProvisionerConfig::default(),
            reservation: ReservationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Size of the task pool; submissions beyond capacity fail fast.
    pub task_pool_size: usize,
    /// Maximum number of tasks dispatched in one wave.
    pub task_concurrency: usize,
    /// Seconds between reconciler ticks.
    pub process_pending_task_interval: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_pool_size: 1000,
            task_concurrency: 1000,
            process_pending_task_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub host_ip: String,
    pub port: u16,
    /// Maximum number of items returned from a collection resource.
    pub max_limit: u32,
    /// Number of API worker processes; informational for process managers.
    pub api_workers: Option<u32>,
    pub enable_ssl_api: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host_ip: "0.0.0.0".to_string(),
            port: 8001,
            max_limit: 1000,
            api_workers: None,
            enable_ssl_api: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL. `memory://` selects the ephemeral in-memory store,
    /// `postgres://…` the PostgreSQL store.
    pub connection: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: "memory://".to_string(),
        }
    }
}

/// One row of the static token table: token string → resolved identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthTokenEntry {
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

// ── Per-driver config groups ──────────────────────────────────────────────────
//
// Each downstream worker declares its own typed section; the registry hands
// the section to the worker's constructor at startup.

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
    /// Seconds to wait for provision-state changes before giving up.
    pub provision_state_timeout: u64,
    /// Seconds between provision-state polls.
    pub poll_interval: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:6385".to_string(),
            auth_token: None,
            provision_state_timeout: 60,
            poll_interval: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReservationConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:1234".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
    /// Hardware property used to index into `expected_labels`.
    pub expected_labels_index_property: String,
    /// Mapping of index value to a `key=value|key2=value2` label spec.
    pub expected_labels: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:6443".to_string(),
            auth_token: None,
            expected_labels_index_property: "machine_name".to_string(),
            expected_labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8808".to_string(),
            auth_token: None,
        }
    }
}
