//! reqwest-backed implementation of [`SongApi`].

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{ApiReply, CreateRequest, SongApi};
use crate::config::{mask_key, ApiConfig, StatusMethod};
use crate::error::{ConfigError, TransportError};

/// HTTP client for the generation API.
///
/// One instance is built per run and shared by both flows. Every request
/// carries the configured timeout; a timeout surfaces as
/// [`TransportError::Timeout`].
pub struct HttpSongApi {
    client: Client,
    config: ApiConfig,
    api_key: String,
}

impl HttpSongApi {
    /// Builds the client from explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingApiKey` when no key is configured.
    pub fn new(config: ApiConfig) -> Result<Self, ConfigError> {
        let api_key = config.require_key()?.to_string();
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "api".to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        tracing::debug!(
            create_url = %config.create_url(),
            status_url = %config.status_url(),
            api_key = %mask_key(&api_key),
            "Generation API client ready"
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Builds the client from `SUNO_API_KEY` / `SUNO_API_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ApiConfig::from_env()?)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl SongApi for HttpSongApi {
    async fn create(&self, request: &CreateRequest) -> Result<ApiReply, TransportError> {
        let response = self
            .client
            .post(self.config.create_url())
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;
        into_reply(response).await
    }

    async fn status(&self, job_id: &str) -> Result<ApiReply, TransportError> {
        let id_field = self.config.status_id_field.as_str();
        let request = match self.config.status_method {
            StatusMethod::Post => {
                let mut body = serde_json::Map::new();
                body.insert(id_field.to_string(), job_id.into());
                self.client.post(self.config.status_url()).json(&body)
            }
            StatusMethod::Get => {
                let mut url = Url::parse(&self.config.status_url())
                    .map_err(|e| TransportError::Request(format!("invalid status URL: {}", e)))?;
                url.query_pairs_mut().append_pair(id_field, job_id);
                self.client.get(url)
            }
        };

        let response = request
            .header("Authorization", self.bearer())
            .send()
            .await?;
        into_reply(response).await
    }

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TransportError> {
        // Audio URLs are pre-signed CDN links; no auth header.
        let mut response = self
            .client
            .get(url)
            .timeout(self.config.download_timeout())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::DownloadStatus {
                status: status.as_u16(),
            });
        }

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

async fn into_reply(response: Response) -> Result<ApiReply, TransportError> {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(std::time::Duration::from_secs);
    let body = response.text().await?;
    Ok(ApiReply {
        status,
        body,
        retry_after,
    })
}
