//! Generation API access.
//!
//! - [`SongApi`]: the seam the flows talk to (HTTP in production, scripted in tests)
//! - [`client::HttpSongApi`]: reqwest implementation
//! - [`classifier`]: maps call results to [`classifier::Outcome`]
//! - [`search`]: bounded nested-field lookup used for ids, statuses and URLs

pub mod classifier;
pub mod client;
pub mod search;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::error::TransportError;

pub use classifier::{Classifier, Failure, Outcome, WaitClass};
pub use client::HttpSongApi;
pub use search::search;

/// Status code and raw body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when the server sent one in seconds.
    pub retry_after: Option<Duration>,
}

impl ApiReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }
}

/// Create payload.
///
/// The upstream API rejects unknown top-level fields, so parameter hints
/// travel inside `prompt` rather than as extra keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub prompt: String,
}

impl CreateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Operations the batch flows need from the generation service.
#[async_trait]
pub trait SongApi: Send + Sync {
    /// Submits a create job.
    async fn create(&self, request: &CreateRequest) -> Result<ApiReply, TransportError>;

    /// Requests the status of a previously created job.
    async fn status(&self, job_id: &str) -> Result<ApiReply, TransportError>;

    /// Streams the resource at `url` into `sink`, returning bytes written.
    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TransportError>;
}
