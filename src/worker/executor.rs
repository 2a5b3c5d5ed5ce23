// ABOUTME: Defines the WorkerExecutor trait - the abstraction over the compute
// ABOUTME: kernel that actually runs a dispatched task's payload.

use async_trait::async_trait;

use crate::dispatch::Task;

/// Executes dispatched tasks.
///
/// The task manager treats execution as a black box: it hands over a task in
/// state `Dispatched` and reconciles whatever comes back. `Ok` bytes become
/// the task result; `Err` fails the task with the error text as the reason.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    /// Run a task and return its output.
    async fn execute(&self, task: &Task) -> Result<Vec<u8>, anyhow::Error>;
}
