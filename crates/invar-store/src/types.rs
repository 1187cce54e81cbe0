use invar_domain::{StateDetails, TaskState};
use uuid::Uuid;

/// Values for a hardware insert. `uuid` is supplied only by the import path;
/// enrollments get a server-assigned one.
#[derive(Debug, Clone)]
pub struct NewHardware {
    pub uuid: Option<Uuid>,
    pub name: String,
    pub project_id: String,
    pub hardware_type: String,
    pub properties: StateDetails,
}

/// Column-wise hardware update. UUID and hardware_type are immutable by
/// construction; properties pinned by the hardware type's `worker_overrides`
/// are rejected at the store boundary.
#[derive(Debug, Clone, Default)]
pub struct HardwareUpdate {
    pub name: Option<String>,
    pub properties: Option<StateDetails>,
}

impl HardwareUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.properties.is_none()
    }
}

/// Column-wise worker task update. Omit `state` when it did not change;
/// persisting an unchanged STEADY is rejected by transition validation.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub state: Option<TaskState>,
    pub state_details: Option<StateDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortDir {
    type Err = invar_domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            other => Err(invar_domain::DomainError::InvalidParameterValue(format!(
                "The sort_dir value \"{other}\" is not valid (use \"asc\" or \"desc\")"
            ))),
        }
    }
}

/// Hardware list filters; pagination is keyset by internal id with an
/// optional secondary sort key.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub limit: Option<u32>,
    pub marker: Option<Uuid>,
    pub sort_key: Option<String>,
    pub sort_dir: SortDir,
    pub project_id: Option<String>,
    pub include_deleted: bool,
}
