use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by orchestration operations.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// ComfyUI returned a non-success HTTP status.
    #[error("ComfyUI returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response from ComfyUI was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// The submitted workflow had node-level errors.
    #[error("Workflow node errors: {0}")]
    NodeErrors(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The server did not become reachable within the allowed time.
    #[error("ComfyUI did not become ready within {0:?}")]
    NotReady(Duration),

    /// The completion wait hit its deadline.
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    /// The completion wait was cancelled by the caller.
    #[error("Generation cancelled")]
    Cancelled,

    /// ComfyUI reported an execution error during generation.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// A required checkpoint file is not present in any model directory.
    #[error("Checkpoint {file_name} not found (searched {searched:?})")]
    CheckpointNotFound {
        file_name: String,
        searched: Vec<PathBuf>,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to spawn or control the ComfyUI process.
    #[error("Process error: {0}")]
    Process(std::io::Error),

    /// The supervised ComfyUI process exited before becoming ready.
    #[error("ComfyUI process exited early: {0}")]
    ProcessExited(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error during format conversion.
    #[error("Image conversion error: {0}")]
    Image(#[from] image::ImageError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ConductorError>;
