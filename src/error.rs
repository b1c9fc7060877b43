//! Error types for songbatch operations.
//!
//! Each subsystem has its own error enum:
//! - Configuration loading and validation
//! - Prompt source parsing
//! - Ledger persistence
//! - HTTP transport to the generation API
//! - Blob store writes
//! - Batch-level stop conditions surfaced to the CLI

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing API key: pass --api-key or set SUNO_API_KEY")]
    MissingApiKey,

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while reading the prompt file.
#[derive(Debug, Error)]
pub enum PromptSourceError {
    #[error("Prompt file not found: {0}")]
    NotFound(PathBuf),

    #[error("No prompts found in {0}")]
    NoPrompts(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading or flushing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger not found at {0}; run `create` first")]
    MissingLedger(PathBuf),

    #[error("Failed to persist ledger to {path}: {reason}")]
    Persist { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures below the HTTP status level.
///
/// These never carry a response; the classifier folds every variant into the
/// retry path.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("download returned HTTP {status}")]
    DownloadStatus { status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors that can occur while writing to the blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Failed to create output directory {path}: {reason}")]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Batch-level stop conditions and setup failures.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Credits exhausted while creating [{index}] v{variant}: {reason}")]
    CreditsExhausted {
        index: u32,
        variant: u32,
        reason: String,
    },

    #[error("API rejected credentials (HTTP 401): {reason}")]
    Unauthorized { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompts(#[from] PromptSourceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}
