// ABOUTME: TaskManagerService - the public facade over limiter, ledger, registry
// ABOUTME: and dispatcher. Hands dispatched tasks to an optional worker executor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::dispatch::{Reconciliation, Task, TaskDispatcher, TaskKind, TaskRequest};
use crate::error::{EmrisError, LedgerError};
use crate::ledger::ResourceLedger;
use crate::limiter::RateLimiter;
use crate::registry::{ModelChunk, ModelRegistry, ModelSnapshot};
use crate::worker::{Completion, TextCodec, WorkerExecutor, decode_completion, prepare_prompt};

/// Point-in-time view of a user's balances and rate bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    pub resources: u64,
    pub rewards: u64,
    pub rate_limit_tokens: u64,
}

/// Handle to a running refill loop. Dropping it stops the loop.
pub struct RefillHandle {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl RefillHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.join.await;
    }
}

/// The task manager.
///
/// Cloning is cheap and clones share all state.
pub struct TaskManagerService {
    config: Arc<ServiceConfig>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<ModelRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    executor: Option<Arc<dyn WorkerExecutor>>,
}

impl Clone for TaskManagerService {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            limiter: Arc::clone(&self.limiter),
            ledger: Arc::clone(&self.ledger),
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            executor: self.executor.clone(),
        }
    }
}

impl TaskManagerService {
    /// Create a service from validated configuration.
    pub fn new(config: ServiceConfig) -> Result<Self, EmrisError> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::from_config(&config));
        let ledger = Arc::new(ResourceLedger::new());
        let registry = Arc::new(ModelRegistry::new());
        let dispatcher = Arc::new(TaskDispatcher::new(
            limiter.clone(),
            ledger.clone(),
            registry.clone(),
            config.reward_per_task,
        ));

        Ok(Self {
            config: Arc::new(config),
            limiter,
            ledger,
            registry,
            dispatcher,
            executor: None,
        })
    }

    /// Attach a worker executor. Every dispatched task is handed to it.
    pub fn with_executor(mut self, executor: Arc<dyn WorkerExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Verify an admin token.
    ///
    /// With no token configured every caller is an admin.
    pub fn check_admin_access(&self, token: &str) -> Result<(), EmrisError> {
        match &self.config.admin_token {
            Some(expected) if expected != token => Err(EmrisError::Unauthorized),
            _ => Ok(()),
        }
    }

    // Users

    /// Register a user with starting balances and rate bucket.
    ///
    /// `rate_limit_tokens` is capped at the bucket capacity.
    pub async fn register_user(
        &self,
        id: &str,
        resources: u64,
        rewards: u64,
        rate_limit_tokens: u64,
    ) -> Result<UserSnapshot, EmrisError> {
        // The bucket is claimed first: submissions only reach the limiter
        // after the ledger knows the user, so they always see the seeded bucket.
        let tokens = self
            .limiter
            .try_seed(id, rate_limit_tokens)
            .await
            .ok_or_else(|| LedgerError::AlreadyExists(id.to_string()))?;
        let account = self.ledger.register(id, resources, rewards).await?;

        tracing::info!(user_id = id, resources, tokens, "user registered");
        Ok(UserSnapshot {
            id: account.id,
            resources: account.resources,
            rewards: account.rewards,
            rate_limit_tokens: tokens,
        })
    }

    /// Overwrite a user's resource balance.
    pub async fn update_user_resources(
        &self,
        user_id: &str,
        new_resources: i128,
    ) -> Result<(), EmrisError> {
        self.ledger.set_resources(user_id, new_resources).await?;
        tracing::debug!(user_id, new_resources, "user resources updated");
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Option<UserSnapshot> {
        let account = self.ledger.get(user_id).await?;
        let tokens = self.limiter.tokens(user_id).await.unwrap_or(0);
        Some(UserSnapshot {
            id: account.id,
            resources: account.resources,
            rewards: account.rewards,
            rate_limit_tokens: tokens,
        })
    }

    pub async fn get_rewards(&self, user_id: &str) -> Result<u64, EmrisError> {
        Ok(self.ledger.rewards(user_id).await?)
    }

    // Models

    pub async fn register_model(
        &self,
        id: &str,
        min_resources: u64,
    ) -> Result<ModelSnapshot, EmrisError> {
        let model = self.registry.register(id, min_resources).await?;
        tracing::info!(model_id = id, min_resources, "model registered");
        Ok(model)
    }

    pub async fn activate_model(&self, id: &str) -> Result<(), EmrisError> {
        Ok(self.registry.activate(id).await?)
    }

    pub async fn deactivate_model(&self, id: &str) -> Result<(), EmrisError> {
        Ok(self.registry.deactivate(id).await?)
    }

    /// Record one chunk of a model's weight data.
    pub async fn distribute_model_chunks(
        &self,
        model_id: &str,
        chunk_index: u32,
        chunk_data: Vec<u8>,
    ) -> Result<(), EmrisError> {
        Ok(self
            .registry
            .distribute_chunk(model_id, chunk_index, chunk_data)
            .await?)
    }

    /// Record that a worker finished a chunk and reward it the first time.
    ///
    /// Returns `true` if this report was the first for the chunk.
    pub async fn submit_computed_chunk(
        &self,
        model_id: &str,
        chunk_index: u32,
        worker_id: &str,
    ) -> Result<bool, EmrisError> {
        if !self.ledger.contains(worker_id).await {
            return Err(LedgerError::NotFound(worker_id.to_string()).into());
        }
        let first = self
            .registry
            .complete_chunk(model_id, chunk_index, worker_id)
            .await?;
        if first {
            let rewards = self
                .ledger
                .credit(worker_id, self.config.reward_per_chunk)
                .await?;
            tracing::info!(model_id, chunk_index, worker_id, rewards, "chunk completed");
        }
        Ok(first)
    }

    pub async fn get_model(&self, id: &str) -> Option<ModelSnapshot> {
        self.registry.get(id).await
    }

    pub async fn get_model_chunks(&self, model_id: &str) -> Result<Vec<ModelChunk>, EmrisError> {
        Ok(self.registry.chunks(model_id).await?)
    }

    pub async fn get_missing_chunks(&self, model_id: &str) -> Result<Vec<u32>, EmrisError> {
        Ok(self.registry.missing_chunks(model_id).await?)
    }

    pub async fn get_chunks_for_worker(&self, worker_id: &str) -> Vec<ModelChunk> {
        self.registry.chunks_for_worker(worker_id).await
    }

    pub async fn get_active_models(&self, offset: usize, limit: usize) -> Vec<ModelSnapshot> {
        self.registry.active_models(offset, limit).await
    }

    /// Inactive models that need more resources than all users hold together.
    pub async fn get_models_needing_resources(
        &self,
        offset: usize,
        limit: usize,
    ) -> Vec<ModelSnapshot> {
        let total = self.ledger.total_resources().await;
        self.registry
            .models_needing_resources(total, offset, limit)
            .await
    }

    // Tasks

    /// Admit and dispatch a task, then hand it to the worker executor if any.
    pub async fn submit_task(&self, request: TaskRequest) -> Result<Task, EmrisError> {
        let task = self.dispatcher.submit(request).await?;
        self.hand_off(task.clone());
        Ok(task)
    }

    /// Encode a prompt and submit it as an inference task.
    pub async fn submit_prompt(
        &self,
        codec: &dyn TextCodec,
        task_id: &str,
        owner_id: &str,
        model_id: &str,
        prompt: &str,
    ) -> Result<Task, EmrisError> {
        let payload = prepare_prompt(codec, prompt)?;
        let request = TaskRequest::new(task_id, owner_id, model_id)
            .kind(TaskKind::Inference)
            .payload(payload);
        self.submit_task(request).await
    }

    /// Decode a completed inference task. `None` until the task completes.
    pub async fn get_completion(
        &self,
        codec: &dyn TextCodec,
        task_id: &str,
    ) -> Result<Option<Completion>, EmrisError> {
        let task = self.get_task(task_id).await?;
        let Some(result) = task.result.as_deref() else {
            return Ok(None);
        };
        let prompt_tokens: Vec<u32> = serde_json::from_slice(&task.payload)?;
        let prompt = codec.decode(&prompt_tokens).map_err(EmrisError::Codec)?;
        Ok(Some(decode_completion(codec, &prompt, result)?))
    }

    /// Reconcile a worker result.
    pub async fn report_task_result(
        &self,
        task_id: &str,
        result: impl Into<Vec<u8>>,
    ) -> Result<Reconciliation, EmrisError> {
        Ok(self.dispatcher.report_result(task_id, result.into()).await?)
    }

    /// Reconcile a worker failure.
    pub async fn report_task_failure(
        &self,
        task_id: &str,
        reason: &str,
    ) -> Result<Reconciliation, EmrisError> {
        Ok(self.dispatcher.report_failure(task_id, reason).await?)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, EmrisError> {
        Ok(self.dispatcher.get(task_id).await?)
    }

    pub async fn get_tasks_for_owner(&self, owner_id: &str) -> Vec<Task> {
        self.dispatcher.tasks_for_owner(owner_id).await
    }

    fn hand_off(&self, task: Task) {
        let Some(executor) = self.executor.clone() else {
            return;
        };

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let reported = match executor.execute(&task).await {
                Ok(output) => dispatcher.report_result(&task.id, output).await,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "worker execution failed");
                    dispatcher.report_failure(&task.id, &e.to_string()).await
                }
            };
            if let Err(e) = reported {
                tracing::warn!(task_id = %task.id, error = %e, "worker report rejected");
            }
        });
    }

    // Rate limiting

    /// Refill every rate bucket once.
    pub async fn tick(&self) {
        self.limiter.tick().await;
    }

    /// Start the background refill loop on the current runtime.
    pub fn spawn_refill(&self) -> RefillHandle {
        let (stop, stopped) = oneshot::channel();
        let limiter = self.limiter.clone();
        let join = tokio::spawn(async move {
            limiter
                .run_refill(async {
                    let _ = stopped.await;
                })
                .await;
        });
        RefillHandle { stop, join }
    }
}
