//! songbatch: bulk song generation against a hosted generation API.
//!
//! Prompts are submitted as create jobs, every job is tracked in a JSON
//! ledger, finished jobs are polled and their audio downloaded, and inputs
//! and outputs are archived with timestamps.

pub mod api;
pub mod archive;
pub mod backoff;
pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod flows;
pub mod ledger;
pub mod prompt_source;

// Re-export commonly used types
pub use config::Settings;
pub use error::{
    BatchError, BlobError, ConfigError, LedgerError, PromptSourceError, TransportError,
};
