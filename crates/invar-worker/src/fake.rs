use async_trait::async_trait;
use invar_domain::{AvailabilityWindow, Context, Hardware, StateDetails};
use invar_schema::WorkerField;
use serde_json::json;
use tracing::debug;

use crate::error::WorkerError;
use crate::worker::{Worker, WorkerResult};

/// A worker that syncs nothing, useful for development and testing. Its
/// fields exercise every private/sensitive combination.
#[derive(Debug, Default)]
pub struct FakeWorker;

impl FakeWorker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn name(&self) -> &'static str {
        "fake-worker"
    }

    fn fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new("private-field").private(),
            WorkerField::new("private-and-sensitive-field").private().sensitive(),
            WorkerField::new("public-field"),
            WorkerField::new("public-and-sensitive-field").sensitive(),
        ]
    }

    async fn process(
        &self,
        _context: &Context,
        hardware: &Hardware,
        availability_windows: &[AvailabilityWindow],
        _state_details: &StateDetails,
    ) -> Result<WorkerResult, WorkerError> {
        debug!(hardware_uuid = %hardware.uuid, "fake-worker: processing hardware");
        let mut payload = StateDetails::new();
        payload.insert("fake-result".to_string(), json!(hardware.uuid.to_string()));
        payload.insert(
            "fake-availability_windows".to_string(),
            json!(availability_windows
                .iter()
                .map(|w| w.uuid.to_string())
                .collect::<Vec<_>>()),
        );
        Ok(WorkerResult::success_with(payload))
    }
}
