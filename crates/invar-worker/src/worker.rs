use async_trait::async_trait;
use invar_domain::{AvailabilityWindow, Context, Hardware, StateDetails};
use invar_schema::{worker_fields_schema, WorkerField};
use serde_json::Value;
use uuid::Uuid;

use crate::error::WorkerError;

/// Outcome of one reconciliation pass for a single task.
///
/// Success payloads are merged into the task's `state_details`; a JSON `null`
/// value acts as a tombstone and removes the key, which is how a worker
/// clears its own keys after tearing down external state for deleted
/// hardware.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResult {
    Success {
        payload: StateDetails,
    },
    /// The worker cannot proceed yet but expects to on a future tick, once
    /// some external state has become consistent with expectations.
    Defer {
        payload: StateDetails,
        reason: Option<String>,
    },
}

impl WorkerResult {
    pub fn success() -> Self {
        WorkerResult::Success {
            payload: StateDetails::new(),
        }
    }

    pub fn success_with(payload: StateDetails) -> Self {
        WorkerResult::Success { payload }
    }

    pub fn defer(reason: impl Into<String>) -> Self {
        WorkerResult::Defer {
            payload: StateDetails::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn defer_with(payload: StateDetails, reason: impl Into<String>) -> Self {
        WorkerResult::Defer {
            payload,
            reason: Some(reason.into()),
        }
    }
}

/// One discovered external resource, returned from [`Worker::import_existing`].
#[derive(Debug, Clone)]
pub struct HardwareImport {
    /// UUID of the hardware this state corresponds to; `None` when one could
    /// not reasonably be determined and should be auto-assigned.
    pub uuid: Option<Uuid>,
    pub name: Option<String>,
    pub properties: StateDetails,
}

/// A reconciliation actor that syncs a Hardware to one external system.
///
/// `process` must be idempotent: calling twice with the same inputs must not
/// produce observable drift beyond the first call. Workers may call external
/// services but never mutate the store directly; communication with other
/// workers happens exclusively through persisted `state_details`.
///
/// `hardware.deleted == true` is the signal to tear down any external state
/// the worker owns.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Ordered list of hardware property fields this worker supports.
    fn fields(&self) -> Vec<WorkerField> {
        Vec::new()
    }

    async fn process(
        &self,
        context: &Context,
        hardware: &Hardware,
        availability_windows: &[AvailabilityWindow],
        state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError>;

    /// Schema validating this worker's fields; derived from [`Worker::fields`].
    fn json_schema(&self) -> Value {
        worker_fields_schema(&self.fields())
    }

    /// Discovery hook for the import command. Optional; the default reports
    /// nothing to import.
    async fn import_existing(
        &self,
        _context: &Context,
    ) -> Result<Vec<HardwareImport>, WorkerError> {
        Ok(Vec::new())
    }
}
