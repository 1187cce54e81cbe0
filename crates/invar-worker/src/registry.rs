use std::collections::HashMap;
use std::sync::Arc;

use invar_config::Config;
use invar_domain::DomainError;
use invar_schema::EnrollBranch;
use tracing::info;

use crate::fake::FakeWorker;
use crate::hardware_type::{Baremetal, EdgeDevice, Fake, HardwareType, WorkerNode};
use crate::orchestrator::OrchestratorWorker;
use crate::provisioner::ProvisionerWorker;
use crate::reservation::ReservationWorker;
use crate::tunnel::TunnelWorker;
use crate::worker::Worker;

/// Holds the hardware types and workers enabled for this process.
///
/// Initialized once at startup and shared read-only by all concurrent task
/// executions. Drivers register under their `name()`; enabled names come
/// from configuration.
#[derive(Default)]
pub struct DriverRegistry {
    hardware_types: HashMap<String, Arc<dyn HardwareType>>,
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("hardware_types", &self.hardware_types.keys().collect::<Vec<_>>())
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the enabled-driver lists in configuration.
    ///
    /// Unknown names are fatal: the process should refuse to start rather
    /// than silently drop a configured driver.
    pub fn from_config(config: &Config) -> Result<Self, DomainError> {
        let mut registry = Self::new();

        for name in &config.enabled_hardware_types {
            let hwt: Arc<dyn HardwareType> = match name.as_str() {
                "fake-hardware" => Arc::new(Fake),
                "baremetal" => Arc::new(Baremetal),
                "edge-device" => Arc::new(EdgeDevice),
                "worker-node" => Arc::new(WorkerNode),
                other => return Err(DomainError::DriverNotFound(other.to_string())),
            };
            registry.register_hardware_type(hwt);
        }

        for name in &config.enabled_worker_types {
            let worker: Arc<dyn Worker> = match name.as_str() {
                "fake-worker" => Arc::new(FakeWorker::new()),
                "provisioner" => Arc::new(ProvisionerWorker::new(config.provisioner.clone())),
                "reservation" => Arc::new(ReservationWorker::new(config.reservation.clone())),
                "orchestrator" => Arc::new(OrchestratorWorker::new(config.orchestrator.clone())),
                "tunnel" => Arc::new(TunnelWorker::new(config.tunnel.clone())),
                other => return Err(DomainError::DriverNotFound(other.to_string())),
            };
            registry.register_worker(worker);
        }

        if registry.hardware_types.is_empty() {
            return Err(DomainError::DriversNotLoaded(config.host.clone()));
        }

        info!(
            hardware_types = ?registry.hardware_type_names(),
            workers = ?registry.worker_names(),
            "loaded drivers"
        );
        Ok(registry)
    }

    pub fn register_hardware_type(&mut self, hwt: Arc<dyn HardwareType>) -> &mut Self {
        self.hardware_types.insert(hwt.name().to_string(), hwt);
        self
    }

    pub fn register_worker(&mut self, worker: Arc<dyn Worker>) -> &mut Self {
        self.workers.insert(worker.name().to_string(), worker);
        self
    }

    pub fn hardware_type(&self, name: &str) -> Result<Arc<dyn HardwareType>, DomainError> {
        self.hardware_types
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::DriverNotFound(name.to_string()))
    }

    pub fn worker(&self, name: &str) -> Result<Arc<dyn Worker>, DomainError> {
        self.workers
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::DriverNotFound(name.to_string()))
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn hardware_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hardware_types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn hardware_types(&self) -> impl Iterator<Item = (&String, &Arc<dyn HardwareType>)> {
        self.hardware_types.iter()
    }

    /// The full property field set a hardware type accepts: its own default
    /// fields plus the fields of every enabled worker that is registered.
    pub fn fields_for(&self, hardware_type: &str) -> Result<Vec<invar_schema::WorkerField>, DomainError> {
        let hwt = self.hardware_type(hardware_type)?;
        let mut fields = hwt.default_fields();
        for worker_name in hwt.enabled_workers() {
            if let Some(worker) = self.workers.get(*worker_name) {
                fields.extend(worker.fields());
            }
        }
        Ok(fields)
    }

    /// Branches for the composed enroll schema, one per registered hardware
    /// type.
    pub fn enroll_branches(&self) -> Vec<EnrollBranch> {
        self.hardware_type_names()
            .into_iter()
            .filter_map(|name| {
                self.fields_for(&name).ok().map(|fields| EnrollBranch {
                    hardware_type: name,
                    fields,
                })
            })
            .collect()
    }
}
