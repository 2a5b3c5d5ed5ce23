// ABOUTME: Task types - submission request, lifecycle state, and reconciliation outcome.
// ABOUTME: States move Pending -> Dispatched -> Completed | Failed; terminal states absorb.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Admitted, waiting for a worker slot.
    Pending,
    /// Handed to a worker; completion arrives asynchronously.
    Dispatched,
    /// Worker returned a result.
    Completed,
    /// Worker reported a failure.
    Failed,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Whether `self -> next` is a valid lifecycle edge.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (*self, next),
            (TaskState::Pending, TaskState::Dispatched)
                | (TaskState::Dispatched, TaskState::Completed)
                | (TaskState::Dispatched, TaskState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Dispatched => "dispatched",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task asks a worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the model forward on an encoded prompt.
    Inference,
    /// Train or fine-tune the model on the payload data.
    Training,
}

/// A task submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-supplied id, unique for the life of the service.
    pub task_id: String,
    pub owner_id: String,
    pub model_id: String,
    pub kind: TaskKind,
    /// Opaque bytes handed to the worker.
    pub payload: Vec<u8>,
}

impl TaskRequest {
    /// Create an inference request with an empty payload.
    pub fn new(
        task_id: impl Into<String>,
        owner_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            owner_id: owner_id.into(),
            model_id: model_id.into(),
            kind: TaskKind::Inference,
            payload: Vec::new(),
        }
    }

    /// Set the task kind.
    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the worker payload.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A submitted task and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub model_id: String,
    pub kind: TaskKind,
    pub payload: Vec<u8>,
    /// Resources debited from the owner at admission.
    pub cost: u64,
    pub state: TaskState,
    /// Worker output, present only once Completed.
    pub result: Option<Vec<u8>>,
    /// Failure reason, present only once Failed.
    pub failure: Option<String>,
}

impl Task {
    /// Create a Pending task from an admitted request.
    pub fn pending(request: TaskRequest, cost: u64) -> Self {
        Self {
            id: request.task_id,
            owner_id: request.owner_id,
            model_id: request.model_id,
            kind: request.kind,
            payload: request.payload,
            cost,
            state: TaskState::Pending,
            result: None,
            failure: None,
        }
    }

    /// Move to `next` if the lifecycle allows it.
    ///
    /// Returns `Err` with the current state when the edge is invalid.
    pub(crate) fn advance(&mut self, next: TaskState) -> Result<(), TaskState> {
        if !self.state.can_transition_to(next) {
            return Err(self.state);
        }
        self.state = next;
        Ok(())
    }
}

/// Outcome of reporting a worker result or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The report moved the task to its terminal state.
    Applied(Task),
    /// The task already held this outcome; nothing changed.
    Duplicate(Task),
}

impl Reconciliation {
    /// The task as stored after the report.
    pub fn task(&self) -> &Task {
        match self {
            Reconciliation::Applied(task) | Reconciliation::Duplicate(task) => task,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Reconciliation::Duplicate(_))
    }

    /// The stored worker result, if the task completed.
    pub fn result(&self) -> Option<&[u8]> {
        self.task().result.as_deref()
    }
}
