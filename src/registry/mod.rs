// ABOUTME: Model registry module - model lifecycle and chunk bookkeeping.
// ABOUTME: Gates activation on distributed chunks and task admission on resources.

mod model_registry;

pub use model_registry::{ModelChunk, ModelRegistry, ModelSnapshot};

#[cfg(test)]
mod model_registry_test;
