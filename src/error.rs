//! Error types for Workforce Pulse

use thiserror::Error;

/// Errors that abort a pipeline run or a service call
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Preprocessing failed: {0}")]
    Preprocess(String),

    #[error("Feature extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Inference error: {0}")]
    Inference(String),
}

/// Errors raised by a single scoring model invocation
///
/// These never abort an inference call; the failing model's slot is marked
/// as an error and aggregation continues.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model failed: {0}")]
    Failed(String),

    #[error("Model returned a non-finite score: {0}")]
    InvalidScore(f64),

    #[error("Model timed out after {0} ms")]
    Timeout(u64),

    #[error("Model task panicked: {0}")]
    Panicked(String),

    #[error("Worker pool is closed")]
    PoolClosed,
}

/// Errors raised while fetching a provider batch
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Unauthorized or expired token for {0}")]
    Unauthorized(String),

    #[error("No access token available for {0}")]
    MissingToken(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {provider}")]
    Status { provider: String, status: u16 },

    #[error("Failed to decode {provider} response: {message}")]
    Decode { provider: String, message: String },

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("Token store error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised by token storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Token store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
