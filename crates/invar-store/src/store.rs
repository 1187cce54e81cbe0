use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invar_domain::{
    AvailabilityWindow, DomainError, Hardware, StateDetails, TaskState, WorkerTask,
};
use invar_patch::WindowChanges;
use invar_worker::DriverRegistry;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{HardwareUpdate, ListFilters, NewHardware, TaskUpdate};

/// Sort keys accepted by `list_hardware` beyond the implicit id ordering.
pub const HARDWARE_SORT_KEYS: &[&str] = &["name", "created_at", "uuid"];

/// Durable storage for Hardware, AvailabilityWindow and WorkerTask.
///
/// One logical transaction per call. Implementations are thread-safe via a
/// session-per-operation pattern; sessions are never shared across
/// concurrent tasks.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Insert a Hardware plus one WorkerTask per worker enabled for its
    /// hardware type, in `initial_task_state` (PENDING, or STEADY for the
    /// import path). Worker field defaults are filled into omitted
    /// properties, and the type's `worker_overrides` are applied last.
    async fn create_hardware(
        &self,
        new: NewHardware,
        initial_task_state: TaskState,
    ) -> Result<Hardware, StoreError>;

    async fn update_hardware(
        &self,
        uuid: Uuid,
        values: HardwareUpdate,
    ) -> Result<Hardware, StoreError>;

    /// Soft-delete: sets the deleted pair, physically removes the hardware's
    /// availability windows, and re-queues every non-IN_PROGRESS task so
    /// workers observe the deletion and release downstream state.
    async fn destroy_hardware(&self, uuid: Uuid) -> Result<(), StoreError>;

    async fn get_hardware_by_uuid(&self, uuid: Uuid) -> Result<Hardware, StoreError>;

    async fn get_hardware_by_name(&self, name: &str) -> Result<Hardware, StoreError>;

    async fn list_hardware(&self, filters: ListFilters) -> Result<Vec<Hardware>, StoreError>;

    /// Persist the outcome of a patch atomically: the hardware row, every
    /// window insert/update/delete, and the task re-queuing all commit
    /// together or not at all.
    async fn apply_patch(
        &self,
        uuid: Uuid,
        values: HardwareUpdate,
        windows: WindowChanges,
    ) -> Result<Hardware, StoreError>;

    async fn create_availability_window(
        &self,
        window: AvailabilityWindow,
    ) -> Result<AvailabilityWindow, StoreError>;

    async fn update_availability_window(
        &self,
        uuid: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilityWindow, StoreError>;

    async fn destroy_availability_window(&self, uuid: Uuid) -> Result<(), StoreError>;

    async fn list_windows_for_hardware(
        &self,
        hardware_uuid: Uuid,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;

    async fn list_all_windows(&self) -> Result<Vec<AvailabilityWindow>, StoreError>;

    /// Tasks currently in `state`, in insertion order. Tasks whose
    /// worker_type is not in the enabled-workers set are silently skipped —
    /// they stay dormant until the worker is re-enabled.
    async fn worker_tasks_in_state(&self, state: TaskState) -> Result<Vec<WorkerTask>, StoreError>;

    async fn worker_tasks_for_hardware(
        &self,
        hardware_uuid: Uuid,
    ) -> Result<Vec<WorkerTask>, StoreError>;

    async fn update_worker_task(
        &self,
        uuid: Uuid,
        values: TaskUpdate,
    ) -> Result<WorkerTask, StoreError>;

    /// Force every non-IN_PROGRESS task for the hardware back to PENDING
    /// (the sync trigger).
    async fn set_tasks_pending(&self, hardware_uuid: Uuid) -> Result<(), StoreError>;
}

// ── Shared preparation logic ──────────────────────────────────────────────────

/// Resolve the hardware type, fill worker-field defaults into omitted
/// properties, apply `worker_overrides` last, and return the worker types a
/// task must be created for.
pub(crate) fn prepare_new_hardware(
    registry: &DriverRegistry,
    new: &NewHardware,
) -> Result<(StateDetails, Vec<String>), DomainError> {
    let hardware_type = registry.hardware_type(&new.hardware_type)?;

    let mut properties = new.properties.clone();
    for field in registry.fields_for(&new.hardware_type)? {
        if let Some(default) = field.default {
            properties.entry(field.name).or_insert(default);
        }
    }
    for (key, value) in hardware_type.worker_overrides() {
        properties.insert(key, value);
    }

    let worker_types = hardware_type
        .enabled_workers()
        .iter()
        .map(|w| w.to_string())
        .collect();
    Ok((properties, worker_types))
}

/// Reject updates that touch properties pinned by the hardware type's
/// `worker_overrides`.
pub(crate) fn check_update_allowed(
    registry: &DriverRegistry,
    hardware: &Hardware,
    values: &HardwareUpdate,
) -> Result<(), DomainError> {
    let Some(properties) = &values.properties else {
        return Ok(());
    };
    let hardware_type = registry.hardware_type(&hardware.hardware_type)?;
    for (key, pinned) in hardware_type.worker_overrides() {
        if properties.get(&key) != Some(&pinned) {
            return Err(DomainError::InvalidParameterValue(format!(
                "Property '{key}' is managed by hardware type '{}' and cannot be changed.",
                hardware.hardware_type
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_sort_key(sort_key: Option<&str>) -> Result<Option<String>, DomainError> {
    match sort_key {
        None => Ok(None),
        Some(key) if HARDWARE_SORT_KEYS.contains(&key) => Ok(Some(key.to_string())),
        Some(key) => Err(DomainError::InvalidParameterValue(format!(
            "The sort_key value \"{key}\" is an invalid field for sorting"
        ))),
    }
}
