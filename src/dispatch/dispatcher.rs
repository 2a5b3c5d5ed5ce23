// ABOUTME: TaskDispatcher - admits tasks through rate limit and resource gates,
// ABOUTME: dispatches them, and reconciles worker reports exactly once per task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::task::{Reconciliation, Task, TaskRequest, TaskState};
use crate::error::{DispatchError, LedgerError};
use crate::ledger::ResourceLedger;
use crate::limiter::RateLimiter;
use crate::registry::{ModelRegistry, ModelSnapshot};

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<String, Arc<Mutex<Task>>>,
    /// Ids whose submission is past the duplicate check but not yet committed.
    reserved: HashSet<String>,
}

/// Claim on a task id for the duration of one submission.
///
/// Dropping an uncommitted reservation frees the id, so a rejected or
/// abandoned submission leaves no trace.
struct Reservation<'a> {
    table: &'a parking_lot::Mutex<TaskTable>,
    task_id: String,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, task: Task) {
        let mut table = self.table.lock();
        table.reserved.remove(&self.task_id);
        table
            .tasks
            .insert(self.task_id.clone(), Arc::new(Mutex::new(task)));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.table.lock().reserved.remove(&self.task_id);
        }
    }
}

/// Task admission, dispatch, and reconciliation.
///
/// # Submission order
///
/// 1. Duplicate id check (known or in-flight ids are rejected).
/// 2. Owner and model must exist; the model must be active.
/// 3. One rate-limit token is spent.
/// 4. The owner's balance must cover the model's `min_resources`.
/// 5. `min_resources` is debited.
/// 6. The task is created Pending and moved to Dispatched.
///
/// A token spent in step 3 is not refunded if step 4 or 5 fails.
///
/// # Reports
///
/// Each task reaches a terminal state at most once. A result redelivered to
/// a Completed task, or a failure redelivered to a Failed task, returns
/// [`Reconciliation::Duplicate`] with the stored task and changes nothing.
pub struct TaskDispatcher {
    table: parking_lot::Mutex<TaskTable>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<ModelRegistry>,
    reward_per_task: u64,
}

impl TaskDispatcher {
    /// Create a dispatcher over shared admission components.
    ///
    /// # Arguments
    ///
    /// * `reward_per_task` - Rewards credited to a task owner on completion.
    pub fn new(
        limiter: Arc<RateLimiter>,
        ledger: Arc<ResourceLedger>,
        registry: Arc<ModelRegistry>,
        reward_per_task: u64,
    ) -> Self {
        Self {
            table: parking_lot::Mutex::new(TaskTable::default()),
            limiter,
            ledger,
            registry,
            reward_per_task,
        }
    }

    fn reserve(&self, task_id: &str) -> Result<Reservation<'_>, DispatchError> {
        let mut table = self.table.lock();
        if table.tasks.contains_key(task_id) || !table.reserved.insert(task_id.to_string()) {
            return Err(DispatchError::DuplicateTask(task_id.to_string()));
        }
        Ok(Reservation {
            table: &self.table,
            task_id: task_id.to_string(),
            committed: false,
        })
    }

    fn record(&self, task_id: &str) -> Result<Arc<Mutex<Task>>, DispatchError> {
        self.table
            .lock()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownTask(task_id.to_string()))
    }

    /// Run steps 2-5 of admission. Returns the model the task runs on.
    async fn admit(&self, request: &TaskRequest) -> Result<ModelSnapshot, DispatchError> {
        let owner_id = request.owner_id.as_str();

        if !self.ledger.contains(owner_id).await {
            return Err(DispatchError::UnknownUser(owner_id.to_string()));
        }
        let model = self
            .registry
            .get(&request.model_id)
            .await
            .ok_or_else(|| DispatchError::UnknownModel(request.model_id.clone()))?;
        if !model.active {
            return Err(DispatchError::ModelInactive(model.id));
        }

        if !self.limiter.try_consume(owner_id).await {
            tracing::trace!(task_id = %request.task_id, owner_id, "submission rate limited");
            return Err(DispatchError::RateLimited(owner_id.to_string()));
        }

        let available = self
            .ledger
            .resources(owner_id)
            .await
            .map_err(|_| DispatchError::UnknownUser(owner_id.to_string()))?;
        if !self.registry.is_eligible(&model.id, available).await {
            tracing::trace!(task_id = %request.task_id, owner_id, available, "owner not eligible");
            return Err(DispatchError::InsufficientResources {
                user_id: owner_id.to_string(),
                required: model.min_resources,
                available,
            });
        }

        self.ledger
            .debit(owner_id, model.min_resources)
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientResources { available, .. } => {
                    DispatchError::InsufficientResources {
                        user_id: owner_id.to_string(),
                        required: model.min_resources,
                        available,
                    }
                }
                _ => DispatchError::UnknownUser(owner_id.to_string()),
            })?;

        Ok(model)
    }

    /// Admit and dispatch a task.
    ///
    /// Returns the task as stored, in state `Dispatched`.
    pub async fn submit(&self, request: TaskRequest) -> Result<Task, DispatchError> {
        let reservation = self.reserve(&request.task_id)?;
        let model = self.admit(&request).await?;

        let mut task = Task::pending(request, model.min_resources);
        // Worker slots are always available; a pool would gate this edge.
        task.advance(TaskState::Dispatched)
            .map_err(|state| DispatchError::AlreadyTerminal {
                task_id: task.id.clone(),
                state,
            })?;

        tracing::info!(
            task_id = %task.id,
            owner_id = %task.owner_id,
            model_id = %task.model_id,
            cost = task.cost,
            "task dispatched"
        );
        reservation.commit(task.clone());
        Ok(task)
    }

    /// Record a worker's result for a task.
    ///
    /// The first report completes the task and credits the owner. A repeat
    /// returns the stored result. A task that already Failed rejects the
    /// report with `AlreadyTerminal`.
    pub async fn report_result(
        &self,
        task_id: &str,
        result: Vec<u8>,
    ) -> Result<Reconciliation, DispatchError> {
        let record = self.record(task_id)?;
        let mut task = record.lock().await;

        match task.state {
            TaskState::Completed => {
                tracing::debug!(task_id, "duplicate result ignored");
                return Ok(Reconciliation::Duplicate(task.clone()));
            }
            TaskState::Failed => {
                return Err(DispatchError::AlreadyTerminal {
                    task_id: task_id.to_string(),
                    state: task.state,
                });
            }
            TaskState::Pending => return Err(DispatchError::NotDispatched(task_id.to_string())),
            TaskState::Dispatched => {}
        }

        // Credit before the transition so a ledger error leaves the task open.
        let rewards = self
            .ledger
            .credit(&task.owner_id, self.reward_per_task)
            .await
            .map_err(|_| DispatchError::UnknownUser(task.owner_id.clone()))?;

        task.advance(TaskState::Completed)
            .map_err(|state| DispatchError::AlreadyTerminal {
                task_id: task_id.to_string(),
                state,
            })?;
        task.result = Some(result);

        tracing::info!(task_id, owner_id = %task.owner_id, rewards, "task completed");
        Ok(Reconciliation::Applied(task.clone()))
    }

    /// Record a worker failure for a task.
    ///
    /// No rewards are credited and the admission debit is not refunded.
    /// A repeat on a Failed task is a duplicate; a Completed task rejects
    /// the report with `AlreadyTerminal`.
    pub async fn report_failure(
        &self,
        task_id: &str,
        reason: &str,
    ) -> Result<Reconciliation, DispatchError> {
        let record = self.record(task_id)?;
        let mut task = record.lock().await;

        match task.state {
            TaskState::Failed => {
                tracing::debug!(task_id, "duplicate failure ignored");
                return Ok(Reconciliation::Duplicate(task.clone()));
            }
            TaskState::Completed => {
                return Err(DispatchError::AlreadyTerminal {
                    task_id: task_id.to_string(),
                    state: task.state,
                });
            }
            TaskState::Pending => return Err(DispatchError::NotDispatched(task_id.to_string())),
            TaskState::Dispatched => {}
        }

        task.advance(TaskState::Failed)
            .map_err(|state| DispatchError::AlreadyTerminal {
                task_id: task_id.to_string(),
                state,
            })?;
        task.failure = Some(reason.to_string());

        tracing::warn!(task_id, owner_id = %task.owner_id, reason, "task failed");
        Ok(Reconciliation::Applied(task.clone()))
    }

    /// Snapshot of a task.
    pub async fn get(&self, task_id: &str) -> Result<Task, DispatchError> {
        let record = self.record(task_id)?;
        let task = record.lock().await.clone();
        Ok(task)
    }

    /// Tasks submitted by a user, sorted by id.
    pub async fn tasks_for_owner(&self, owner_id: &str) -> Vec<Task> {
        let records: Vec<_> = self.table.lock().tasks.values().cloned().collect();
        let mut tasks = Vec::new();
        for record in records {
            let task = record.lock().await;
            if task.owner_id == owner_id {
                tasks.push(task.clone());
            }
        }
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Number of tasks ever created.
    pub fn count(&self) -> usize {
        self.table.lock().tasks.len()
    }
}
