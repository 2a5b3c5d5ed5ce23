// ABOUTME: Tests for the ModelRegistry - lifecycle, chunk gating, eligibility.
// ABOUTME: Covers duplicate chunks, gap detection, and exactly-once chunk completion.

use std::sync::Arc;

use super::model_registry::ModelRegistry;
use crate::error::RegistryError;

#[tokio::test]
async fn test_register_starts_inactive_and_empty() {
    let registry = ModelRegistry::new();
    let model = registry.register("m1", 500).await.unwrap();

    assert_eq!(model.id, "m1");
    assert_eq!(model.min_resources, 500);
    assert!(!model.active);
    assert!(model.chunk_indices.is_empty());
    assert_eq!(registry.get("m1").await, Some(model));
}

#[tokio::test]
async fn test_register_duplicate() {
    let registry = ModelRegistry::new();
    registry.register("m1", 500).await.unwrap();

    let err = registry.register("m1", 1).await.unwrap_err();
    assert_eq!(err, RegistryError::AlreadyExists("m1".to_string()));
    assert_eq!(registry.get("m1").await.unwrap().min_resources, 500);
}

#[tokio::test]
async fn test_activate_requires_chunk() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();

    let err = registry.activate("m1").await.unwrap_err();
    assert_eq!(err, RegistryError::NoChunksDistributed("m1".to_string()));
    assert!(!registry.get("m1").await.unwrap().active);

    registry.distribute_chunk("m1", 0, vec![1, 2, 3]).await.unwrap();
    registry.activate("m1").await.unwrap();
    assert!(registry.get("m1").await.unwrap().active);
}

#[tokio::test]
async fn test_activate_idempotent() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();
    registry.distribute_chunk("m1", 0, vec![0]).await.unwrap();

    registry.activate("m1").await.unwrap();
    registry.activate("m1").await.unwrap();
    assert!(registry.get("m1").await.unwrap().active);
}

#[tokio::test]
async fn test_activate_unknown_model() {
    let registry = ModelRegistry::new();
    let err = registry.activate("ghost").await.unwrap_err();
    assert_eq!(err, RegistryError::NotFound("ghost".to_string()));
}

#[tokio::test]
async fn test_deactivate_keeps_chunks() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();
    registry.distribute_chunk("m1", 0, vec![0]).await.unwrap();
    registry.activate("m1").await.unwrap();

    registry.deactivate("m1").await.unwrap();
    registry.deactivate("m1").await.unwrap();

    let model = registry.get("m1").await.unwrap();
    assert!(!model.active);
    assert_eq!(model.chunk_indices, vec![0]);

    registry.activate("m1").await.unwrap();
    assert!(registry.get("m1").await.unwrap().active);

    assert_eq!(
        registry.deactivate("ghost").await,
        Err(RegistryError::NotFound("ghost".to_string()))
    );
}

#[tokio::test]
async fn test_distribute_duplicate_chunk() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();
    registry.distribute_chunk("m1", 3, vec![1]).await.unwrap();

    let err = registry.distribute_chunk("m1", 3, vec![2]).await.unwrap_err();
    assert_eq!(
        err,
        RegistryError::DuplicateChunk {
            model_id: "m1".to_string(),
            chunk_index: 3,
        }
    );

    let chunks = registry.chunks("m1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].data, vec![1]);
}

#[tokio::test]
async fn test_distribute_unknown_model() {
    let registry = ModelRegistry::new();
    let err = registry.distribute_chunk("ghost", 0, vec![]).await.unwrap_err();
    assert_eq!(err, RegistryError::NotFound("ghost".to_string()));
}

#[tokio::test]
async fn test_out_of_order_chunks_and_gaps() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();
    assert!(registry.missing_chunks("m1").await.unwrap().is_empty());

    for index in [4, 0, 2] {
        registry.distribute_chunk("m1", index, vec![]).await.unwrap();
    }

    let indices: Vec<u32> = registry
        .chunks("m1")
        .await
        .unwrap()
        .iter()
        .map(|c| c.index)
        .collect();
    assert_eq!(indices, vec![0, 2, 4]);
    assert_eq!(registry.missing_chunks("m1").await.unwrap(), vec![1, 3]);

    registry.distribute_chunk("m1", 1, vec![]).await.unwrap();
    registry.distribute_chunk("m1", 3, vec![]).await.unwrap();
    assert!(registry.missing_chunks("m1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_is_eligible() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();

    assert!(registry.is_eligible("m1", 5).await);
    assert!(registry.is_eligible("m1", 6).await);
    assert!(!registry.is_eligible("m1", 4).await);
    assert!(!registry.is_eligible("ghost", 1_000).await);
}

#[tokio::test]
async fn test_complete_chunk_exactly_once() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();
    registry.distribute_chunk("m1", 0, vec![9]).await.unwrap();

    assert_eq!(registry.complete_chunk("m1", 0, "w1").await, Ok(true));
    assert_eq!(registry.complete_chunk("m1", 0, "w2").await, Ok(false));

    let chunk = &registry.chunks("m1").await.unwrap()[0];
    assert!(chunk.completed);
    assert_eq!(chunk.completed_by.as_deref(), Some("w1"));
    assert_eq!(registry.get("m1").await.unwrap().completed_chunks, 1);

    assert_eq!(
        registry.complete_chunk("m1", 7, "w1").await,
        Err(RegistryError::UnknownChunk {
            model_id: "m1".to_string(),
            chunk_index: 7,
        })
    );
}

#[tokio::test]
async fn test_chunks_for_worker() {
    let registry = ModelRegistry::new();
    registry.register("m1", 5).await.unwrap();
    registry.register("m2", 5).await.unwrap();
    registry.distribute_chunk("m1", 0, vec![]).await.unwrap();
    registry.distribute_chunk("m1", 1, vec![]).await.unwrap();
    registry.distribute_chunk("m2", 0, vec![]).await.unwrap();

    registry.complete_chunk("m2", 0, "w1").await.unwrap();
    registry.complete_chunk("m1", 1, "w1").await.unwrap();
    registry.complete_chunk("m1", 0, "w2").await.unwrap();

    let chunks = registry.chunks_for_worker("w1").await;
    let keys: Vec<(&str, u32)> = chunks
        .iter()
        .map(|c| (c.model_id.as_str(), c.index))
        .collect();
    assert_eq!(keys, vec![("m1", 1), ("m2", 0)]);
    assert!(registry.chunks_for_worker("nobody").await.is_empty());
}

#[tokio::test]
async fn test_active_models_paginated() {
    let registry = ModelRegistry::new();
    for id in ["c", "a", "d", "b"] {
        registry.register(id, 1).await.unwrap();
        registry.distribute_chunk(id, 0, vec![]).await.unwrap();
    }
    for id in ["a", "b", "c"] {
        registry.activate(id).await.unwrap();
    }

    let ids = |models: Vec<super::ModelSnapshot>| -> Vec<String> {
        models.into_iter().map(|m| m.id).collect()
    };
    assert_eq!(ids(registry.active_models(0, 10).await), vec!["a", "b", "c"]);
    assert_eq!(ids(registry.active_models(1, 1).await), vec!["b"]);
    assert!(registry.active_models(5, 10).await.is_empty());
}

#[tokio::test]
async fn test_models_needing_resources() {
    let registry = ModelRegistry::new();
    registry.register("small", 100).await.unwrap();
    registry.register("large", 5_000).await.unwrap();
    registry.register("huge", 9_000).await.unwrap();

    let needing = registry.models_needing_resources(1_000, 0, 10).await;
    let ids: Vec<&str> = needing.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["huge", "large"]);

    registry.distribute_chunk("large", 0, vec![]).await.unwrap();
    registry.activate("large").await.unwrap();
    let needing = registry.models_needing_resources(1_000, 0, 10).await;
    assert_eq!(needing.len(), 1);
    assert_eq!(needing[0].id, "huge");
}

#[tokio::test]
async fn test_concurrent_duplicate_chunk_single_winner() {
    let registry = Arc::new(ModelRegistry::new());
    registry.register("m1", 5).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.distribute_chunk("m1", 0, vec![i]).await
        }));
    }

    let mut recorded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            recorded += 1;
        }
    }

    assert_eq!(recorded, 1);
    assert_eq!(registry.chunks("m1").await.unwrap().len(), 1);
}
