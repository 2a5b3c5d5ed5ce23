// ABOUTME: Dispatch module - task admission, dispatch, and result reconciliation.
// ABOUTME: Provides the Task state machine and the TaskDispatcher.

mod dispatcher;
mod task;

pub use dispatcher::TaskDispatcher;
pub use task::{Reconciliation, Task, TaskKind, TaskRequest, TaskState};

#[cfg(test)]
mod dispatcher_test;
