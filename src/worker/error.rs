//! Worker error types

use thiserror::Error;

use crate::script::ScriptError;

/// Failure to construct a worker. No thread or port outlives it.
#[derive(Error, Debug)]
pub enum WorkerCreationError {
    #[error("Worker constructor: at least 1 argument required, but only 0 passed")]
    MissingScript,

    #[error("Worker constructor: file {0} does not exist")]
    ScriptNotFound(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A message payload that cannot be represented on the wire
#[derive(Error, Debug)]
#[error("Failed to serialize message: {0}")]
pub struct SerializationError(#[from] pub serde_json::Error);

/// Worker subsystem error type
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Creation(#[from] WorkerCreationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
