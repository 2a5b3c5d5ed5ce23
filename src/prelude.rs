// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use emris::prelude::*;` to get started quickly.

pub use crate::config::ServiceConfig;
pub use crate::dispatch::{Reconciliation, Task, TaskDispatcher, TaskKind, TaskRequest, TaskState};
pub use crate::error::{
    ConfigError, DispatchError, EmrisError, ErrorKind, LedgerError, RegistryError,
};
pub use crate::ledger::{ResourceLedger, UserAccount};
pub use crate::limiter::RateLimiter;
pub use crate::registry::{ModelChunk, ModelRegistry, ModelSnapshot};
pub use crate::service::{RefillHandle, TaskManagerService, UserSnapshot};
pub use crate::worker::{
    Completion, TextCodec, VocabCodec, WorkerExecutor, decode_completion, prepare_prompt,
};
