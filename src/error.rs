//! Top-level error types for Parlance.

use uuid::Uuid;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Condition compilation errors.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("invalid expression literal (expected /pattern/flags): {0}")]
    Invalid(String),

    #[error("unknown regex flag '{flag}' in {literal}")]
    UnknownFlag { flag: char, literal: String },

    #[error("range must be \"lo-hi\" with 0 <= lo <= hi <= 999: {0}")]
    Range(String),

    #[error("regex compilation failed: {0}")]
    Compile(#[from] regex::Error),
}

/// Adapter loading and invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown {slot} adapter: {name}")]
    Unknown { slot: &'static str, name: String },

    #[error("{slot} adapter '{name}' failed to load: {source}")]
    Load {
        slot: &'static str,
        name: String,
        source: anyhow::Error,
    },

    #[error("{slot} adapter call timed out after {timeout_ms}ms")]
    Timeout { slot: &'static str, timeout_ms: u64 },

    #[error("no {slot} adapter registered")]
    Missing { slot: &'static str },
}

/// A middleware piece (or the stage completion) failed.
///
/// The offending state is identified by message id; the orchestrator still
/// holds the state itself when this surfaces.
#[derive(Debug, thiserror::Error)]
#[error("middleware '{kind}' failed for message {message_id}: {source}")]
pub struct MiddlewareError {
    pub kind: &'static str,
    pub message_id: Uuid,
    pub source: anyhow::Error,
}

/// A branch callback failed during execution.
#[derive(Debug, thiserror::Error)]
#[error("branch '{branch_id}' callback failed for message {message_id}: {source}")]
pub struct BranchError {
    pub branch_id: String,
    pub message_id: Uuid,
    pub source: anyhow::Error,
}

/// Memory storage and snapshot errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory operation requires a storage adapter but none is registered")]
    StorageUnavailable,

    #[error("failed to save memory snapshot: {0}")]
    SaveFailed(String),

    #[error("failed to load memory snapshot: {0}")]
    LoadFailed(String),
}

/// Envelope composition errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope method already set to '{current}', cannot change to '{requested}'")]
    MethodConflict { current: String, requested: String },
}

/// Lifecycle state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("registry is frozen while the bot is {status}")]
    Frozen { status: String },
}
