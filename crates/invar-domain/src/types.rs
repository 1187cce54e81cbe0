use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DomainError;

/// Opaque key/value map carried on a worker task. Owned jointly by the
/// reconciler (transient keys below) and the worker (payload keys).
pub type StateDetails = Map<String, Value>;

// Transient keys the reconciler manages on `state_details`. Cleared when a
// task reaches STEADY.
pub const LAST_ERROR_DETAIL: &str = "last_error";
pub const DEFER_COUNT_DETAIL: &str = "defer_count";
pub const DEFER_REASON_DETAIL: &str = "defer_reason";
pub const FALLBACK_PAYLOAD_DETAIL: &str = "result";

pub const TRANSIENT_DETAILS: &[&str] = &[
    LAST_ERROR_DETAIL,
    DEFER_COUNT_DETAIL,
    DEFER_REASON_DETAIL,
    FALLBACK_PAYLOAD_DETAIL,
];

// ── Task state machine ────────────────────────────────────────────────────────

/// The lifecycle state of a [`WorkerTask`].
///
/// Transitions:
///   PENDING ──claim──▶ IN_PROGRESS ──success──▶ STEADY
///                           ├──defer──▶ PENDING
///                           └──error──▶ ERROR
///   STEADY | ERROR ──user edit / destroy / sync──▶ PENDING
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    InProgress,
    Steady,
    Error,
}

impl TaskState {
    /// Validate a persisted state change. `STEADY → STEADY` is invalid;
    /// callers must omit the state field entirely when it did not change.
    pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), DomainError> {
        match (from, to) {
            (TaskState::Steady, TaskState::Steady) => Err(DomainError::InvalidParameterValue(
                "Worker task state cannot transition from STEADY to STEADY".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Steady => "STEADY",
            TaskState::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "IN_PROGRESS" => Ok(TaskState::InProgress),
            "STEADY" => Ok(TaskState::Steady),
            "ERROR" => Ok(TaskState::Error),
            other => Err(DomainError::InvalidParameterValue(format!(
                "'{other}' is not a valid worker task state"
            ))),
        }
    }
}

// ── Core entities ─────────────────────────────────────────────────────────────

/// A managed compute unit (row in the inventory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    /// Internal monotonic row id; drives keyset pagination, never serialized
    /// over the API.
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    /// Unique among non-deleted rows.
    pub name: String,
    /// Owning tenant; assigned from the request context on enroll, immutable.
    pub project_id: String,
    /// Name of a registered hardware type; immutable.
    pub hardware_type: String,
    /// Free-form typed properties, validated against the composed schema for
    /// the hardware type and its enabled workers.
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A `[start, end)` interval during which a hardware item is bookable
/// downstream. Windows exist only for non-deleted hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub hardware_uuid: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The per-(hardware, worker) reconciliation row. Unique on
/// `(hardware_uuid, worker_type)`; persists across soft-deletes of its
/// hardware so the worker can release downstream state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    pub hardware_uuid: Uuid,
    pub worker_type: String,
    pub state: TaskState,
    pub state_details: StateDetails,
}

impl WorkerTask {
    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == TaskState::InProgress
    }
}
