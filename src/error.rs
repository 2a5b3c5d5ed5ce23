// ABOUTME: Defines all error types for the emris task manager using thiserror.
// ABOUTME: Each component has its own error enum, unified under EmrisError.

use std::path::PathBuf;

use crate::dispatch::TaskState;

/// Top-level error type for the task manager.
#[derive(Debug, thiserror::Error)]
pub enum EmrisError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Admin token rejected")]
    Unauthorized,

    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    #[error("Codec error: {0}")]
    Codec(#[source] anyhow::Error),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl EmrisError {
    /// The stable kind of this error, for callers that render outcomes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmrisError::Ledger(e) => e.kind(),
            EmrisError::Registry(e) => e.kind(),
            EmrisError::Dispatch(e) => e.kind(),
            EmrisError::Config(_) => ErrorKind::InvalidConfig,
            EmrisError::Unauthorized => ErrorKind::Unauthorized,
            EmrisError::EmptyPrompt => ErrorKind::EmptyPrompt,
            EmrisError::Codec(_) | EmrisError::Payload(_) => ErrorKind::Codec,
        }
    }
}

/// Stable discriminant for every failure the service can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    UnknownUser,
    UnknownModel,
    UnknownTask,
    UnknownChunk,
    InvalidAmount,
    InsufficientResources,
    RateLimited,
    ModelInactive,
    NoChunksDistributed,
    DuplicateChunk,
    DuplicateTask,
    AlreadyTerminal,
    NotDispatched,
    Unauthorized,
    EmptyPrompt,
    InvalidConfig,
    Codec,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnknownUser => "unknown_user",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::UnknownTask => "unknown_task",
            ErrorKind::UnknownChunk => "unknown_chunk",
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::InsufficientResources => "insufficient_resources",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ModelInactive => "model_inactive",
            ErrorKind::NoChunksDistributed => "no_chunks_distributed",
            ErrorKind::DuplicateChunk => "duplicate_chunk",
            ErrorKind::DuplicateTask => "duplicate_task",
            ErrorKind::AlreadyTerminal => "already_terminal",
            ErrorKind::NotDispatched => "not_dispatched",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::EmptyPrompt => "empty_prompt",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Codec => "codec",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from balance operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Invalid amount {amount} for user '{user_id}'")]
    InvalidAmount { user_id: String, amount: i128 },

    #[error("User '{user_id}' has {available} resources, {requested} requested")]
    InsufficientResources {
        user_id: String,
        requested: u64,
        available: u64,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            LedgerError::InsufficientResources { .. } => ErrorKind::InsufficientResources,
        }
    }
}

/// Errors from model lifecycle and chunk bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Model already exists: {0}")]
    AlreadyExists(String),

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model '{0}' has no distributed chunks")]
    NoChunksDistributed(String),

    #[error("Chunk {chunk_index} of model '{model_id}' already distributed")]
    DuplicateChunk { model_id: String, chunk_index: u32 },

    #[error("Chunk {chunk_index} of model '{model_id}' was never distributed")]
    UnknownChunk { model_id: String, chunk_index: u32 },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::NoChunksDistributed(_) => ErrorKind::NoChunksDistributed,
            RegistryError::DuplicateChunk { .. } => ErrorKind::DuplicateChunk,
            RegistryError::UnknownChunk { .. } => ErrorKind::UnknownChunk,
        }
    }
}

/// Errors from task admission and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Task already submitted: {0}")]
    DuplicateTask(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Model is not active: {0}")]
    ModelInactive(String),

    #[error("Rate limit exceeded for user '{0}'")]
    RateLimited(String),

    #[error("User '{user_id}' has {available} resources, model requires {required}")]
    InsufficientResources {
        user_id: String,
        required: u64,
        available: u64,
    },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task '{task_id}' is already {state}")]
    AlreadyTerminal { task_id: String, state: TaskState },

    #[error("Task has not been dispatched: {0}")]
    NotDispatched(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::DuplicateTask(_) => ErrorKind::DuplicateTask,
            DispatchError::UnknownUser(_) => ErrorKind::UnknownUser,
            DispatchError::UnknownModel(_) => ErrorKind::UnknownModel,
            DispatchError::ModelInactive(_) => ErrorKind::ModelInactive,
            DispatchError::RateLimited(_) => ErrorKind::RateLimited,
            DispatchError::InsufficientResources { .. } => ErrorKind::InsufficientResources,
            DispatchError::UnknownTask(_) => ErrorKind::UnknownTask,
            DispatchError::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            DispatchError::NotDispatched(_) => ErrorKind::NotDispatched,
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
