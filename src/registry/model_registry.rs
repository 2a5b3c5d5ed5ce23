// ABOUTME: ModelRegistry - registered/active model lifecycle and chunk records.
// ABOUTME: Tracks chunk indices individually so gaps in a distribution are visible.

use std::collections::{BTreeMap, HashMap, btree_map, hash_map};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::RegistryError;

/// A numbered fragment of a model's weight data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChunk {
    /// Model this chunk belongs to.
    pub model_id: String,
    /// Sequence index within the model.
    pub index: u32,
    /// Raw chunk bytes.
    pub data: Vec<u8>,
    /// Whether a worker has reported this chunk computed.
    pub completed: bool,
    /// The worker that completed it, once completed.
    pub completed_by: Option<String>,
}

/// Point-in-time view of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub id: String,
    pub min_resources: u64,
    pub active: bool,
    /// Recorded chunk indices, ascending.
    pub chunk_indices: Vec<u32>,
    pub completed_chunks: usize,
}

struct ModelRecord {
    id: String,
    min_resources: u64,
    active: bool,
    chunks: BTreeMap<u32, ModelChunk>,
}

impl ModelRecord {
    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            id: self.id.clone(),
            min_resources: self.min_resources,
            active: self.active,
            chunk_indices: self.chunks.keys().copied().collect(),
            completed_chunks: self.chunks.values().filter(|c| c.completed).count(),
        }
    }
}

/// Registry of compute models.
///
/// # Lifecycle
///
/// - Models register inactive with no chunks.
/// - **Activation requires a chunk:** `activate()` fails with
///   `NoChunksDistributed` until at least one chunk is recorded.
/// - **Idempotent activate/deactivate:** repeating either succeeds unchanged.
/// - Chunks are never removed, so an active model always has one.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<Mutex<ModelRecord>>>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inactive model.
    ///
    /// # Arguments
    ///
    /// * `model_id` - Unique model identifier.
    /// * `min_resources` - Resources debited from the owner of every task run on this model.
    pub async fn register(
        &self,
        model_id: &str,
        min_resources: u64,
    ) -> Result<ModelSnapshot, RegistryError> {
        let mut models = self.models.write().await;
        match models.entry(model_id.to_string()) {
            hash_map::Entry::Occupied(_) => Err(RegistryError::AlreadyExists(model_id.to_string())),
            hash_map::Entry::Vacant(slot) => {
                let record = ModelRecord {
                    id: model_id.to_string(),
                    min_resources,
                    active: false,
                    chunks: BTreeMap::new(),
                };
                let snapshot = record.snapshot();
                slot.insert(Arc::new(Mutex::new(record)));
                Ok(snapshot)
            }
        }
    }

    async fn record(&self, model_id: &str) -> Result<Arc<Mutex<ModelRecord>>, RegistryError> {
        self.models
            .read()
            .await
            .get(model_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(model_id.to_string()))
    }

    async fn all_records(&self) -> Vec<Arc<Mutex<ModelRecord>>> {
        self.models.read().await.values().cloned().collect()
    }

    /// Mark a model active.
    pub async fn activate(&self, model_id: &str) -> Result<(), RegistryError> {
        let record = self.record(model_id).await?;
        let mut record = record.lock().await;
        if record.chunks.is_empty() {
            return Err(RegistryError::NoChunksDistributed(model_id.to_string()));
        }
        if !record.active {
            record.active = true;
            tracing::info!(model_id, chunks = record.chunks.len(), "model activated");
        }
        Ok(())
    }

    /// Mark a model inactive. Its chunks are kept.
    pub async fn deactivate(&self, model_id: &str) -> Result<(), RegistryError> {
        let record = self.record(model_id).await?;
        let mut record = record.lock().await;
        if record.active {
            record.active = false;
            tracing::info!(model_id, "model deactivated");
        }
        Ok(())
    }

    /// Record chunk `chunk_index` of a model.
    ///
    /// Indices may arrive in any order; each may be recorded once.
    pub async fn distribute_chunk(
        &self,
        model_id: &str,
        chunk_index: u32,
        data: Vec<u8>,
    ) -> Result<(), RegistryError> {
        let record = self.record(model_id).await?;
        let mut record = record.lock().await;
        match record.chunks.entry(chunk_index) {
            btree_map::Entry::Occupied(_) => Err(RegistryError::DuplicateChunk {
                model_id: model_id.to_string(),
                chunk_index,
            }),
            btree_map::Entry::Vacant(slot) => {
                tracing::debug!(model_id, chunk_index, bytes = data.len(), "chunk distributed");
                slot.insert(ModelChunk {
                    model_id: model_id.to_string(),
                    index: chunk_index,
                    data,
                    completed: false,
                    completed_by: None,
                });
                Ok(())
            }
        }
    }

    /// Record that `worker_id` finished computing a chunk.
    ///
    /// Returns `Ok(true)` for the first report and `Ok(false)` for any
    /// repeat, which leaves the original completer in place.
    pub async fn complete_chunk(
        &self,
        model_id: &str,
        chunk_index: u32,
        worker_id: &str,
    ) -> Result<bool, RegistryError> {
        let record = self.record(model_id).await?;
        let mut record = record.lock().await;
        let chunk =
            record
                .chunks
                .get_mut(&chunk_index)
                .ok_or_else(|| RegistryError::UnknownChunk {
                    model_id: model_id.to_string(),
                    chunk_index,
                })?;

        if chunk.completed {
            return Ok(false);
        }
        chunk.completed = true;
        chunk.completed_by = Some(worker_id.to_string());
        Ok(true)
    }

    /// Whether a user holding `user_resources` may run a task on this model.
    ///
    /// Unknown models are never eligible.
    pub async fn is_eligible(&self, model_id: &str, user_resources: u64) -> bool {
        match self.record(model_id).await {
            Ok(record) => user_resources >= record.lock().await.min_resources,
            Err(_) => false,
        }
    }

    /// Snapshot of a model.
    pub async fn get(&self, model_id: &str) -> Option<ModelSnapshot> {
        let record = self.record(model_id).await.ok()?;
        let snapshot = record.lock().await.snapshot();
        Some(snapshot)
    }

    /// Chunk records of a model, ascending by index.
    pub async fn chunks(&self, model_id: &str) -> Result<Vec<ModelChunk>, RegistryError> {
        let record = self.record(model_id).await?;
        let chunks = record.lock().await.chunks.values().cloned().collect();
        Ok(chunks)
    }

    /// Indices below the highest recorded index that have not been distributed.
    pub async fn missing_chunks(&self, model_id: &str) -> Result<Vec<u32>, RegistryError> {
        let record = self.record(model_id).await?;
        let record = record.lock().await;
        let Some(&highest) = record.chunks.keys().next_back() else {
            return Ok(Vec::new());
        };
        Ok((0..highest)
            .filter(|index| !record.chunks.contains_key(index))
            .collect())
    }

    /// Chunks completed by a given worker, across all models.
    pub async fn chunks_for_worker(&self, worker_id: &str) -> Vec<ModelChunk> {
        let mut chunks = Vec::new();
        for record in self.all_records().await {
            let record = record.lock().await;
            chunks.extend(
                record
                    .chunks
                    .values()
                    .filter(|c| c.completed_by.as_deref() == Some(worker_id))
                    .cloned(),
            );
        }
        chunks.sort_by(|a, b| (&a.model_id, a.index).cmp(&(&b.model_id, b.index)));
        chunks
    }

    async fn snapshots_where<P>(&self, predicate: P, offset: usize, limit: usize) -> Vec<ModelSnapshot>
    where
        P: Fn(&ModelSnapshot) -> bool,
    {
        let mut snapshots = Vec::new();
        for record in self.all_records().await {
            let snapshot = record.lock().await.snapshot();
            if predicate(&snapshot) {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots.into_iter().skip(offset).take(limit).collect()
    }

    /// Active models sorted by id, paginated.
    pub async fn active_models(&self, offset: usize, limit: usize) -> Vec<ModelSnapshot> {
        self.snapshots_where(|m| m.active, offset, limit).await
    }

    /// Inactive models whose minimum exceeds `total_resources`, sorted by id, paginated.
    pub async fn models_needing_resources(
        &self,
        total_resources: u64,
        offset: usize,
        limit: usize,
    ) -> Vec<ModelSnapshot> {
        self.snapshots_where(
            |m| !m.active && m.min_resources > total_resources,
            offset,
            limit,
        )
        .await
    }

    /// Number of registered models.
    pub async fn count(&self) -> usize {
        self.models.read().await.len()
    }
}
