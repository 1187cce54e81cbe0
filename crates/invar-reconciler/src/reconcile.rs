use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use invar_domain::{
    AvailabilityWindow, Context, Hardware, StateDetails, TaskState, WorkerTask,
    DEFER_COUNT_DETAIL, DEFER_REASON_DETAIL, TRANSIENT_DETAILS,
};
use invar_store::{ListFilters, Store, TaskUpdate};
use invar_worker::{DriverRegistry, WorkerResult};
use serde_json::{json, Value};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ReconcileError;

/// Drives pending worker tasks to completion.
///
/// One reconciler process owns the work pool; the claim protocol is
/// best-effort and relies on single-process sequencing, not cross-process
/// locking.
pub struct Reconciler {
    store: Arc<dyn Store>,
    registry: Arc<DriverRegistry>,
    /// Bounds concurrent worker invocations; submission beyond capacity
    /// fails fast with NoFreeWorker.
    pool: Arc<Semaphore>,
    task_concurrency: usize,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<DriverRegistry>,
        task_pool_size: usize,
        task_concurrency: usize,
    ) -> Self {
        Self {
            store,
            registry,
            pool: Arc::new(Semaphore::new(task_pool_size)),
            task_concurrency: task_concurrency.max(1),
        }
    }

    /// One reconciliation tick: snapshot the tables, batch the pending tasks
    /// so that no two tasks for the same hardware run concurrently, and
    /// dispatch each batch in bounded waves.
    pub async fn process_pending(&self, context: &Context) -> Result<(), ReconcileError> {
        // The snapshot includes soft-deleted hardware: tasks re-queued by the
        // destroy cascade must still resolve their hardware row to observe
        // `deleted` and release downstream state.
        let hardware_table: HashMap<Uuid, Arc<Hardware>> = self
            .store
            .list_hardware(ListFilters {
                include_deleted: true,
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|h| (h.uuid, Arc::new(h)))
            .collect();

        let mut availability_table: HashMap<Uuid, Arc<Vec<AvailabilityWindow>>> = HashMap::new();
        {
            let mut grouped: HashMap<Uuid, Vec<AvailabilityWindow>> = HashMap::new();
            for window in self.store.list_all_windows().await? {
                grouped.entry(window.hardware_uuid).or_default().push(window);
            }
            for (uuid, windows) in grouped {
                availability_table.insert(uuid, Arc::new(windows));
            }
        }

        let pending = self.store.worker_tasks_in_state(TaskState::Pending).await?;
        if pending.is_empty() {
            debug!("no pending worker tasks");
            return Ok(());
        }

        // Group tasks by hardware, preserving insertion order within each
        // group and the order in which hardwares first appear.
        let mut group_index: HashMap<Uuid, usize> = HashMap::new();
        let mut groups: Vec<VecDeque<WorkerTask>> = Vec::new();
        for task in pending {
            match group_index.get(&task.hardware_uuid) {
                Some(&i) => groups[i].push_back(task),
                None => {
                    group_index.insert(task.hardware_uuid, groups.len());
                    groups.push(VecDeque::from([task]));
                }
            }
        }

        // Batches take the nth task of every group: each batch holds at most
        // one task per hardware, so same-hardware tasks execute strictly in
        // creation order while different hardwares run in parallel.
        let mut batch_no = 0;
        loop {
            let batch: Vec<WorkerTask> =
                groups.iter_mut().filter_map(VecDeque::pop_front).collect();
            if batch.is_empty() {
                break;
            }
            for chunk in batch.chunks(self.task_concurrency) {
                batch_no += 1;
                self.run_chunk(context, batch_no, chunk, &hardware_table, &availability_table)
                    .await?;
            }
        }
        Ok(())
    }

    /// Dispatch one wave of tasks to the pool and wait for all of them.
    /// An exception in one task must not affect the others: every task is
    /// its own failure domain.
    async fn run_chunk(
        &self,
        context: &Context,
        batch_no: usize,
        chunk: &[WorkerTask],
        hardware_table: &HashMap<Uuid, Arc<Hardware>>,
        availability_table: &HashMap<Uuid, Arc<Vec<AvailabilityWindow>>>,
    ) -> Result<(), ReconcileError> {
        let mut join_set = JoinSet::new();
        for task in chunk {
            let permit = self
                .pool
                .clone()
                .try_acquire_owned()
                .map_err(|_| invar_domain::DomainError::NoFreeWorker)?;
            let store = self.store.clone();
            let registry = self.registry.clone();
            let hardware = hardware_table.get(&task.hardware_uuid).cloned();
            let windows = availability_table
                .get(&task.hardware_uuid)
                .cloned()
                .unwrap_or_default();
            let task = task.clone();
            let context = context.clone();
            join_set.spawn(async move {
                let _permit = permit;
                process_task(&context, store, registry, task, hardware, windows).await
            });
        }

        let mut processed = 0usize;
        let mut failures = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => processed += 1,
                Ok(Err(e)) => {
                    failures += 1;
                    debug!(error = %e, "task could not be processed");
                }
                Err(join_error) => {
                    failures += 1;
                    error!(error = %join_error, "task execution aborted");
                }
            }
        }
        info!(
            batch = batch_no,
            processed, failures, "processed batch of worker tasks"
        );
        Ok(())
    }

    /// Run `process_pending` immediately, then on every interval tick, until
    /// the shutdown signal flips. An in-flight tick always finishes before
    /// the loop exits, draining the pool.
    pub async fn run(
        &self,
        context: &Context,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_pending(context).await {
                        warn!(error = %e, "process_pending failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    return;
                }
            }
        }
    }
}

/// Execute one claimed task end to end and persist the result.
async fn process_task(
    context: &Context,
    store: Arc<dyn Store>,
    registry: Arc<DriverRegistry>,
    task: WorkerTask,
    hardware: Option<Arc<Hardware>>,
    windows: Arc<Vec<AvailabilityWindow>>,
) -> Result<(), ReconcileError> {
    let mut state_details = task.state_details.clone();

    // Claim: PENDING → IN_PROGRESS, persisted before the worker runs.
    store
        .update_worker_task(
            task.uuid,
            TaskUpdate {
                state: Some(TaskState::InProgress),
                state_details: None,
            },
        )
        .await?;

    let outcome = invoke_worker(
        context,
        &registry,
        &task,
        hardware,
        windows,
        state_details.clone(),
    )
    .await;

    let update = match outcome {
        Ok(result) => {
            if matches!(result, WorkerResult::Success { .. }) {
                info!(
                    worker_type = %task.worker_type,
                    hardware_uuid = %task.hardware_uuid,
                    "finished processing hardware"
                );
            }
            interpret_result(TaskState::InProgress, &mut state_details, result)
        }
        Err(message) => {
            error!(
                worker_type = %task.worker_type,
                hardware_uuid = %task.hardware_uuid,
                error = %message,
                "failed to process hardware"
            );
            state_details.insert(
                invar_domain::LAST_ERROR_DETAIL.to_string(),
                json!(message),
            );
            TaskUpdate {
                state: Some(TaskState::Error),
                state_details: Some(state_details),
            }
        }
    };

    store.update_worker_task(task.uuid, update).await?;
    Ok(())
}

/// Call the worker inside its own spawned task so a panic is contained and
/// recorded instead of taking down the wave. Domain errors carry their
/// formatted message; anything else is recorded as "Unhandled error".
async fn invoke_worker(
    context: &Context,
    registry: &DriverRegistry,
    task: &WorkerTask,
    hardware: Option<Arc<Hardware>>,
    windows: Arc<Vec<AvailabilityWindow>>,
    state_details: StateDetails,
) -> Result<WorkerResult, String> {
    let worker = registry
        .worker(&task.worker_type)
        .map_err(|e| e.to_string())?;
    let hardware = hardware.ok_or_else(|| {
        invar_domain::DomainError::HardwareNotFound(task.hardware_uuid.to_string()).to_string()
    })?;

    let context = context.clone();
    let call = tokio::spawn(async move {
        worker
            .process(&context, &hardware, &windows, &state_details)
            .await
    });
    match call.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(worker_error)) => Err(worker_error.to_string()),
        Err(join_error) => {
            error!(error = %join_error, "Unhandled error");
            Err("Unhandled error".to_string())
        }
    }
}

/// Merge a result payload into `state_details`. A JSON null value is a
/// tombstone: it removes the key, which is how workers clear their own keys
/// after teardown.
fn merge_details(state_details: &mut StateDetails, payload: StateDetails) {
    for (key, value) in payload {
        if value.is_null() {
            state_details.remove(&key);
        } else {
            state_details.insert(key, value);
        }
    }
}

/// Interpret a worker result into a column-wise task update. The `state`
/// field is omitted when unchanged; the store rejects a STEADY → STEADY
/// write.
fn interpret_result(
    current_state: TaskState,
    state_details: &mut StateDetails,
    result: WorkerResult,
) -> TaskUpdate {
    match result {
        WorkerResult::Success { payload } => {
            merge_details(state_details, payload);
            for key in TRANSIENT_DETAILS {
                state_details.remove(*key);
            }
            TaskUpdate {
                state: (current_state != TaskState::Steady).then_some(TaskState::Steady),
                state_details: Some(state_details.clone()),
            }
        }
        WorkerResult::Defer { payload, reason } => {
            let count = state_details
                .get(DEFER_COUNT_DETAIL)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            state_details.insert(DEFER_COUNT_DETAIL.to_string(), json!(count + 1));
            if let Some(reason) = reason {
                state_details.insert(DEFER_REASON_DETAIL.to_string(), json!(reason));
            }
            merge_details(state_details, payload);
            TaskUpdate {
                state: (current_state != TaskState::Pending).then_some(TaskState::Pending),
                state_details: Some(state_details.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use invar_config::Config;
    use invar_domain::DomainError;
    use invar_store::{InMemoryStore, NewHardware};
    use invar_worker::{Worker, WorkerError};
    use std::sync::Mutex;

    fn registry_with(workers: Vec<Arc<dyn Worker>>) -> Arc<DriverRegistry> {
        let mut registry = DriverRegistry::from_config(&Config::default()).unwrap();
        for worker in workers {
            registry.register_worker(worker);
        }
        Arc::new(registry)
    }

    fn reconciler_for(registry: Arc<DriverRegistry>) -> (Reconciler, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(registry.clone()));
        let reconciler = Reconciler::new(store.clone(), registry, 100, 100);
        (reconciler, store)
    }

    fn fake_hardware(name: &str) -> NewHardware {
        let mut properties = StateDetails::new();
        properties.insert("default_required_field".into(), json!("x"));
        NewHardware {
            uuid: None,
            name: name.to_string(),
            project_id: "fake_project".to_string(),
            hardware_type: "fake-hardware".to_string(),
            properties,
        }
    }

    async fn single_task(store: &InMemoryStore, hardware_uuid: Uuid) -> WorkerTask {
        let tasks = store.worker_tasks_for_hardware(hardware_uuid).await.unwrap();
        assert_eq!(tasks.len(), 1);
        tasks[0].clone()
    }

    #[tokio::test]
    async fn tick_moves_pending_task_to_steady() {
        let registry = registry_with(vec![]);
        let (reconciler, store) = reconciler_for(registry);
        let hw = store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();

        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state, TaskState::Steady);
        assert_eq!(task.state_details["fake-result"], json!(hw.uuid.to_string()));
        for key in TRANSIENT_DETAILS {
            assert!(!task.state_details.contains_key(*key), "{key} should be cleared");
        }
    }

    #[tokio::test]
    async fn two_ticks_over_steady_state_are_idempotent() {
        let registry = registry_with(vec![]);
        let (reconciler, store) = reconciler_for(registry);
        let hw = store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();
        let first = single_task(&store, hw.uuid).await;
        reconciler.process_pending(&Context::admin()).await.unwrap();
        let second = single_task(&store, hw.uuid).await;
        assert_eq!(first, second);
    }

    struct DeferWorker;

    #[async_trait]
    impl Worker for DeferWorker {
        fn name(&self) -> &'static str {
            "fake-worker"
        }
        async fn process(
            &self,
            _context: &Context,
            _hardware: &Hardware,
            _windows: &[AvailabilityWindow],
            _state_details: &StateDetails,
        ) -> Result<WorkerResult, WorkerError> {
            Ok(WorkerResult::defer("not ready"))
        }
    }

    #[tokio::test]
    async fn defer_requeues_and_counts() {
        let registry = registry_with(vec![Arc::new(DeferWorker)]);
        let (reconciler, store) = reconciler_for(registry);
        let hw = store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();
        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.state_details[DEFER_COUNT_DETAIL], json!(1));
        assert_eq!(task.state_details[DEFER_REASON_DETAIL], json!("not ready"));

        reconciler.process_pending(&Context::admin()).await.unwrap();
        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state_details[DEFER_COUNT_DETAIL], json!(2));
    }

    struct FailingWorker;

    #[async_trait]
    impl Worker for FailingWorker {
        fn name(&self) -> &'static str {
            "fake-worker"
        }
        async fn process(
            &self,
            _context: &Context,
            _hardware: &Hardware,
            _windows: &[AvailabilityWindow],
            _state_details: &StateDetails,
        ) -> Result<WorkerResult, WorkerError> {
            Err(WorkerError::Api {
                service: "downstream".into(),
                code: 500,
                text: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn worker_error_moves_task_to_error_with_message() {
        let registry = registry_with(vec![Arc::new(FailingWorker)]);
        let (reconciler, store) = reconciler_for(registry);
        let hw = store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();
        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state, TaskState::Error);
        assert_eq!(
            task.state_details[invar_domain::LAST_ERROR_DETAIL],
            json!("downstream responded with HTTP 500: boom")
        );
    }

    struct PanickingWorker;

    #[async_trait]
    impl Worker for PanickingWorker {
        fn name(&self) -> &'static str {
            "fake-worker"
        }
        async fn process(
            &self,
            _context: &Context,
            _hardware: &Hardware,
            _windows: &[AvailabilityWindow],
            _state_details: &StateDetails,
        ) -> Result<WorkerResult, WorkerError> {
            panic!("programmer error");
        }
    }

    #[tokio::test]
    async fn worker_panic_is_recorded_as_unhandled_error() {
        let registry = registry_with(vec![Arc::new(PanickingWorker)]);
        let (reconciler, store) = reconciler_for(registry);
        let hw = store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();
        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state, TaskState::Error);
        assert_eq!(
            task.state_details[invar_domain::LAST_ERROR_DETAIL],
            json!("Unhandled error")
        );
    }

    /// Records every (worker, hardware) entry and exit so tests can assert
    /// same-hardware serialization.
    struct RecordingWorker {
        worker_name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Worker for RecordingWorker {
        fn name(&self) -> &'static str {
            self.worker_name
        }
        async fn process(
            &self,
            _context: &Context,
            hardware: &Hardware,
            _windows: &[AvailabilityWindow],
            _state_details: &StateDetails,
        ) -> Result<WorkerResult, WorkerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}:start", self.worker_name, hardware.uuid));
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}:end", self.worker_name, hardware.uuid));
            Ok(WorkerResult::success())
        }
    }

    struct TwoWorkerType;

    impl invar_worker::HardwareType for TwoWorkerType {
        fn name(&self) -> &'static str {
            "two-worker"
        }
        fn enabled_workers(&self) -> &'static [&'static str] {
            &["first-worker", "second-worker"]
        }
        fn default_fields(&self) -> Vec<invar_schema::WorkerField> {
            vec![invar_schema::WorkerField::new("default_required_field").required()]
        }
    }

    #[tokio::test]
    async fn same_hardware_tasks_run_strictly_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DriverRegistry::from_config(&Config::default()).unwrap();
        registry.register_hardware_type(Arc::new(TwoWorkerType));
        registry.register_worker(Arc::new(RecordingWorker {
            worker_name: "first-worker",
            log: log.clone(),
        }));
        registry.register_worker(Arc::new(RecordingWorker {
            worker_name: "second-worker",
            log: log.clone(),
        }));
        let registry = Arc::new(registry);
        let (reconciler, store) = reconciler_for(registry);

        let mut new = fake_hardware("n1");
        new.hardware_type = "two-worker".into();
        let hw = store.create_hardware(new, TaskState::Pending).await.unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                format!("first-worker:{}:start", hw.uuid),
                format!("first-worker:{}:end", hw.uuid),
                format!("second-worker:{}:start", hw.uuid),
                format!("second-worker:{}:end", hw.uuid),
            ],
            "the first task must complete before the second is dispatched"
        );
    }

    struct DeletionObservingWorker;

    #[async_trait]
    impl Worker for DeletionObservingWorker {
        fn name(&self) -> &'static str {
            "fake-worker"
        }
        async fn process(
            &self,
            _context: &Context,
            hardware: &Hardware,
            _windows: &[AvailabilityWindow],
            _state_details: &StateDetails,
        ) -> Result<WorkerResult, WorkerError> {
            let mut payload = StateDetails::new();
            if hardware.deleted {
                payload.insert("external_ref".to_string(), Value::Null);
            } else {
                payload.insert("external_ref".to_string(), json!("ext-1"));
            }
            Ok(WorkerResult::success_with(payload))
        }
    }

    #[tokio::test]
    async fn deleted_hardware_is_visible_to_workers_and_keys_are_cleared() {
        let registry = registry_with(vec![Arc::new(DeletionObservingWorker)]);
        let (reconciler, store) = reconciler_for(registry);
        let hw = store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        reconciler.process_pending(&Context::admin()).await.unwrap();
        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state_details["external_ref"], json!("ext-1"));

        // Destroy re-queues the task; the next tick lets the worker see the
        // deletion and clear its key via a null tombstone.
        store.destroy_hardware(hw.uuid).await.unwrap();
        reconciler.process_pending(&Context::admin()).await.unwrap();
        let task = single_task(&store, hw.uuid).await;
        assert_eq!(task.state, TaskState::Steady);
        assert!(!task.state_details.contains_key("external_ref"));
    }

    #[tokio::test]
    async fn pool_exhaustion_fails_fast() {
        let registry = registry_with(vec![]);
        let store = Arc::new(InMemoryStore::new(registry.clone()));
        // A pool of zero permits cannot accept any submission.
        let reconciler = Reconciler::new(store.clone(), registry, 0, 100);
        store
            .create_hardware(fake_hardware("n1"), TaskState::Pending)
            .await
            .unwrap();

        let err = reconciler
            .process_pending(&Context::admin())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Domain(DomainError::NoFreeWorker)
        ));
    }

    #[test]
    fn interpret_success_omits_unchanged_steady_state() {
        let mut details = StateDetails::new();
        details.insert(DEFER_COUNT_DETAIL.to_string(), json!(3));
        let update = interpret_result(
            TaskState::Steady,
            &mut details,
            WorkerResult::success(),
        );
        assert!(update.state.is_none(), "STEADY → STEADY must not be written");
        assert!(!update
            .state_details
            .unwrap()
            .contains_key(DEFER_COUNT_DETAIL));
    }

    #[test]
    fn interpret_defer_preserves_prior_reason_when_absent() {
        let mut details = StateDetails::new();
        details.insert(DEFER_REASON_DETAIL.to_string(), json!("earlier"));
        let update = interpret_result(
            TaskState::InProgress,
            &mut details,
            WorkerResult::Defer {
                payload: StateDetails::new(),
                reason: None,
            },
        );
        assert_eq!(update.state, Some(TaskState::Pending));
        let details = update.state_details.unwrap();
        assert_eq!(details[DEFER_REASON_DETAIL], json!("earlier"));
        assert_eq!(details[DEFER_COUNT_DETAIL], json!(1));
    }
}
