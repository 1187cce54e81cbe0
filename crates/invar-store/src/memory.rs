use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invar_domain::{
    AvailabilityWindow, DomainError, Hardware, TaskState, WorkerTask,
};
use invar_patch::WindowChanges;
use invar_worker::DriverRegistry;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{check_update_allowed, prepare_new_hardware, validate_sort_key, Store};
use crate::types::{HardwareUpdate, ListFilters, NewHardware, SortDir, TaskUpdate};

#[derive(Debug, Default)]
struct Inner {
    next_hardware_id: i64,
    next_window_id: i64,
    next_task_id: i64,
    hardware: Vec<Hardware>,
    windows: Vec<AvailabilityWindow>,
    tasks: Vec<WorkerTask>,
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. Backs the `memory://` connection URL
/// and the test suites. A single write lock per operation stands in for the
/// SQL transaction, so the atomicity rules match the Postgres store.
#[derive(Clone)]
pub struct InMemoryStore {
    registry: Arc<DriverRegistry>,
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

fn sort_value(hardware: &Hardware, key: &str) -> String {
    match key {
        "name" => hardware.name.clone(),
        "created_at" => hardware.created_at.to_rfc3339(),
        "uuid" => hardware.uuid.to_string(),
        _ => String::new(),
    }
}

fn requeue_tasks(inner: &mut Inner, hardware_uuid: Uuid) {
    for task in inner
        .tasks
        .iter_mut()
        .filter(|t| t.hardware_uuid == hardware_uuid && t.state != TaskState::InProgress)
    {
        task.state = TaskState::Pending;
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_hardware(
        &self,
        new: NewHardware,
        initial_task_state: TaskState,
    ) -> Result<Hardware, StoreError> {
        let (properties, worker_types) = prepare_new_hardware(&self.registry, &new)?;
        let uuid = new.uuid.unwrap_or_else(Uuid::new_v4);

        let mut inner = self.inner.write().await;
        if inner.hardware.iter().any(|h| h.uuid == uuid) {
            return Err(DomainError::HardwareAlreadyExists(uuid).into());
        }
        if inner
            .hardware
            .iter()
            .any(|h| !h.deleted && h.name == new.name)
        {
            return Err(DomainError::HardwareDuplicateName(new.name).into());
        }

        inner.next_hardware_id += 1;
        let hardware = Hardware {
            id: inner.next_hardware_id,
            uuid,
            name: new.name,
            project_id: new.project_id,
            hardware_type: new.hardware_type,
            properties,
            created_at: Utc::now(),
            updated_at: None,
            deleted: false,
            deleted_at: None,
        };
        inner.hardware.push(hardware.clone());

        for worker_type in worker_types {
            inner.next_task_id += 1;
            let task = WorkerTask {
                id: inner.next_task_id,
                uuid: Uuid::new_v4(),
                hardware_uuid: uuid,
                worker_type,
                state: initial_task_state,
                state_details: Default::default(),
            };
            inner.tasks.push(task);
        }
        Ok(hardware)
    }

    async fn update_hardware(
        &self,
        uuid: Uuid,
        values: HardwareUpdate,
    ) -> Result<Hardware, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .hardware
            .iter()
            .find(|h| h.uuid == uuid && !h.deleted)
            .cloned()
            .ok_or_else(|| DomainError::HardwareNotFound(uuid.to_string()))?;
        check_update_allowed(&self.registry, &current, &values)?;

        if let Some(name) = &values.name {
            if inner
                .hardware
                .iter()
                .any(|h| !h.deleted && h.uuid != uuid && &h.name == name)
            {
                return Err(DomainError::HardwareDuplicateName(name.clone()).into());
            }
        }

        let hardware = inner
            .hardware
            .iter_mut()
            .find(|h| h.uuid == uuid)
            .expect("row vanished under write lock");
        if let Some(name) = values.name {
            hardware.name = name;
        }
        if let Some(properties) = values.properties {
            hardware.properties = properties;
        }
        hardware.updated_at = Some(Utc::now());
        Ok(hardware.clone())
    }

    async fn destroy_hardware(&self, uuid: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let hardware = inner
            .hardware
            .iter_mut()
            .find(|h| h.uuid == uuid && !h.deleted)
            .ok_or_else(|| DomainError::HardwareNotFound(uuid.to_string()))?;
        hardware.deleted = true;
        hardware.deleted_at = Some(Utc::now());

        inner.windows.retain(|w| w.hardware_uuid != uuid);
        requeue_tasks(&mut inner, uuid);
        Ok(())
    }

    async fn get_hardware_by_uuid(&self, uuid: Uuid) -> Result<Hardware, StoreError> {
        let inner = self.inner.read().await;
        inner
            .hardware
            .iter()
            .find(|h| h.uuid == uuid && !h.deleted)
            .cloned()
            .ok_or_else(|| DomainError::HardwareNotFound(uuid.to_string()).into())
    }

    async fn get_hardware_by_name(&self, name: &str) -> Result<Hardware, StoreError> {
        let inner = self.inner.read().await;
        inner
            .hardware
            .iter()
            .find(|h| h.name == name && !h.deleted)
            .cloned()
            .ok_or_else(|| DomainError::HardwareNotFound(name.to_string()).into())
    }

    async fn list_hardware(&self, filters: ListFilters) -> Result<Vec<Hardware>, StoreError> {
        let sort_key = validate_sort_key(filters.sort_key.as_deref())?;
        let inner = self.inner.read().await;

        let mut rows: Vec<Hardware> = inner
            .hardware
            .iter()
            .filter(|h| filters.include_deleted || !h.deleted)
            .filter(|h| {
                filters
                    .project_id
                    .as_deref()
                    .map(|p| h.project_id == p)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match &sort_key {
                Some(key) => sort_value(a, key)
                    .cmp(&sort_value(b, key))
                    .then(a.id.cmp(&b.id)),
                None => a.id.cmp(&b.id),
            };
            match filters.sort_dir {
                SortDir::Asc => ordering,
                SortDir::Desc => ordering.reverse(),
            }
        });

        if let Some(marker) = filters.marker {
            let position = rows.iter().position(|h| h.uuid == marker).ok_or_else(|| {
                DomainError::InvalidParameterValue(format!(
                    "Marker {marker} does not identify a listable hardware"
                ))
            })?;
            rows.drain(..=position);
        }
        if let Some(limit) = filters.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn apply_patch(
        &self,
        uuid: Uuid,
        values: HardwareUpdate,
        windows: WindowChanges,
    ) -> Result<Hardware, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .hardware
            .iter()
            .find(|h| h.uuid == uuid && !h.deleted)
            .cloned()
            .ok_or_else(|| DomainError::HardwareNotFound(uuid.to_string()))?;
        check_update_allowed(&self.registry, &current, &values)?;

        if let Some(name) = &values.name {
            if inner
                .hardware
                .iter()
                .any(|h| !h.deleted && h.uuid != uuid && &h.name == name)
            {
                return Err(DomainError::HardwareDuplicateName(name.clone()).into());
            }
        }
        // Validate window references before mutating anything, so a failed
        // patch leaves no partial writes behind.
        for window in windows.to_update.iter() {
            if !inner
                .windows
                .iter()
                .any(|w| w.uuid == window.uuid && w.hardware_uuid == uuid)
            {
                return Err(DomainError::AvailabilityWindowNotFound(window.uuid).into());
            }
        }
        for window_uuid in windows.to_remove.iter() {
            if !inner
                .windows
                .iter()
                .any(|w| w.uuid == *window_uuid && w.hardware_uuid == uuid)
            {
                return Err(DomainError::AvailabilityWindowNotFound(*window_uuid).into());
            }
        }

        {
            let hardware = inner
                .hardware
                .iter_mut()
                .find(|h| h.uuid == uuid)
                .expect("row vanished under write lock");
            if let Some(name) = values.name {
                hardware.name = name;
            }
            if let Some(properties) = values.properties {
                hardware.properties = properties;
            }
            hardware.updated_at = Some(Utc::now());
        }

        for mut window in windows.to_add {
            inner.next_window_id += 1;
            window.id = inner.next_window_id;
            window.hardware_uuid = uuid;
            inner.windows.push(window);
        }
        for update in windows.to_update {
            let window = inner
                .windows
                .iter_mut()
                .find(|w| w.uuid == update.uuid)
                .expect("validated above");
            window.start = update.start;
            window.end = update.end;
        }
        inner
            .windows
            .retain(|w| !windows.to_remove.contains(&w.uuid));

        requeue_tasks(&mut inner, uuid);

        Ok(inner
            .hardware
            .iter()
            .find(|h| h.uuid == uuid)
            .cloned()
            .expect("row vanished under write lock"))
    }

    async fn create_availability_window(
        &self,
        mut window: AvailabilityWindow,
    ) -> Result<AvailabilityWindow, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner
            .hardware
            .iter()
            .any(|h| h.uuid == window.hardware_uuid && !h.deleted)
        {
            return Err(DomainError::HardwareNotFound(window.hardware_uuid.to_string()).into());
        }
        inner.next_window_id += 1;
        window.id = inner.next_window_id;
        inner.windows.push(window.clone());
        Ok(window)
    }

    async fn update_availability_window(
        &self,
        uuid: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilityWindow, StoreError> {
        let mut inner = self.inner.write().await;
        let window = inner
            .windows
            .iter_mut()
            .find(|w| w.uuid == uuid)
            .ok_or(DomainError::AvailabilityWindowNotFound(uuid))?;
        window.start = start;
        window.end = end;
        Ok(window.clone())
    }

    async fn destroy_availability_window(&self, uuid: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.windows.len();
        inner.windows.retain(|w| w.uuid != uuid);
        if inner.windows.len() == before {
            return Err(DomainError::AvailabilityWindowNotFound(uuid).into());
        }
        Ok(())
    }

    async fn list_windows_for_hardware(
        &self,
        hardware_uuid: Uuid,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let inner = self.inner.read().await;
        let mut windows: Vec<AvailabilityWindow> = inner
            .windows
            .iter()
            .filter(|w| w.hardware_uuid == hardware_uuid)
            .cloned()
            .collect();
        windows.sort_by_key(|w| w.id);
        Ok(windows)
    }

    async fn list_all_windows(&self) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let inner = self.inner.read().await;
        let mut windows = inner.windows.clone();
        windows.sort_by_key(|w| w.id);
        Ok(windows)
    }

    async fn worker_tasks_in_state(&self, state: TaskState) -> Result<Vec<WorkerTask>, StoreError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<WorkerTask> = inner
            .tasks
            .iter()
            .filter(|t| t.state == state && self.registry.has_worker(&t.worker_type))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn worker_tasks_for_hardware(
        &self,
        hardware_uuid: Uuid,
    ) -> Result<Vec<WorkerTask>, StoreError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<WorkerTask> = inner
            .tasks
            .iter()
            .filter(|t| t.hardware_uuid == hardware_uuid)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn update_worker_task(
        &self,
        uuid: Uuid,
        values: TaskUpdate,
    ) -> Result<WorkerTask, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.uuid == uuid)
            .ok_or(DomainError::WorkerTaskNotFound(uuid))?;
        if let Some(state) = values.state {
            TaskState::validate_transition(task.state, state)?;
            task.state = state;
        }
        if let Some(state_details) = values.state_details {
            task.state_details = state_details;
        }
        Ok(task.clone())
    }

    async fn set_tasks_pending(&self, hardware_uuid: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.hardware.iter().any(|h| h.uuid == hardware_uuid) {
            return Err(DomainError::HardwareNotFound(hardware_uuid.to_string()).into());
        }
        requeue_tasks(&mut inner, hardware_uuid);
        Ok(())
    }
}
