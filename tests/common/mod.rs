//! Shared fixtures for the batch integration tests.
//!
//! [`ScriptedApi`] replays canned replies instead of talking to a server.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use songbatch::api::{ApiReply, CreateRequest, SongApi};
use songbatch::config::Settings;
use songbatch::TransportError;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// In-memory generation API.
///
/// - create replies are consumed in order; once exhausted every create
///   succeeds with `task-<n>` (n counts create calls from 1)
/// - status replies are scripted per job id; the last one repeats
/// - downloads serve registered bytes, anything else is a 404
#[derive(Default)]
pub struct ScriptedApi {
    creates: Mutex<VecDeque<ApiReply>>,
    create_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, VecDeque<ApiReply>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    audio: Mutex<HashMap<String, Vec<u8>>>,
    probe: Option<PathBuf>,
    observed: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_creates(self, replies: Vec<ApiReply>) -> Self {
        self.creates.lock().expect("lock").extend(replies);
        self
    }

    pub fn with_status(self, job_id: &str, replies: Vec<ApiReply>) -> Self {
        self.statuses
            .lock()
            .expect("lock")
            .insert(job_id.to_string(), replies.into());
        self
    }

    pub fn with_audio(self, url: &str, bytes: &[u8]) -> Self {
        self.audio
            .lock()
            .expect("lock")
            .insert(url.to_string(), bytes.to_vec());
        self
    }

    /// Before each create call, records the last ledger item found in the
    /// file at `ledger`.
    pub fn probing(mut self, ledger: &Path) -> Self {
        self.probe = Some(ledger.to_path_buf());
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls
            .lock()
            .expect("lock")
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    /// Status of each observed ledger item, `<none>` when there was none.
    pub fn observed(&self) -> Vec<String> {
        self.observed_items()
            .iter()
            .map(|item| item["status"].as_str().unwrap_or("<none>").to_string())
            .collect()
    }

    pub fn observed_items(&self) -> Vec<serde_json::Value> {
        self.observed.lock().expect("lock").clone()
    }

    fn observe(&self) {
        let Some(path) = &self.probe else {
            return;
        };
        let item = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|doc| doc["items"].as_array().and_then(|items| items.last()).cloned())
            .unwrap_or(serde_json::Value::Null);
        self.observed.lock().expect("lock").push(item);
    }
}

#[async_trait]
impl SongApi for ScriptedApi {
    async fn create(&self, request: &CreateRequest) -> Result<ApiReply, TransportError> {
        self.observe();
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().expect("lock").push(request.prompt.clone());
        let scripted = self.creates.lock().expect("lock").pop_front();
        Ok(scripted.unwrap_or_else(|| task_reply(&format!("task-{}", n))))
    }

    async fn status(&self, job_id: &str) -> Result<ApiReply, TransportError> {
        *self
            .status_calls
            .lock()
            .expect("lock")
            .entry(job_id.to_string())
            .or_insert(0) += 1;

        let mut statuses = self.statuses.lock().expect("lock");
        let Some(queue) = statuses.get_mut(job_id) else {
            return Ok(ApiReply::new(404, "unknown job"));
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(reply.unwrap_or_else(|| ApiReply::new(404, "unknown job")))
    }

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, TransportError> {
        let bytes = self.audio.lock().expect("lock").get(url).cloned();
        let Some(bytes) = bytes else {
            return Err(TransportError::DownloadStatus { status: 404 });
        };
        sink.write_all(&bytes).await?;
        sink.flush().await?;
        Ok(bytes.len() as u64)
    }
}

/// Create reply in the nested `data.taskId` shape.
pub fn task_reply(task_id: &str) -> ApiReply {
    ApiReply::new(
        200,
        format!(r#"{{"code": 200, "msg": "success", "data": {{"taskId": "{}"}}}}"#, task_id),
    )
}

/// Status reply for a finished job with one clip.
pub fn success_reply(audio_url: &str) -> ApiReply {
    ApiReply::new(
        200,
        format!(
            r#"{{"code": 200, "data": {{"status": "SUCCESS", "response": {{"sunoData": [{{"id": "clip-1", "audioUrl": "{}"}}]}}}}}}"#,
            audio_url
        ),
    )
}

pub fn pending_reply() -> ApiReply {
    ApiReply::new(200, r#"{"code": 200, "data": {"status": "PENDING"}}"#)
}

pub fn failed_reply() -> ApiReply {
    ApiReply::new(200, r#"{"code": 200, "data": {"status": "GENERATE_AUDIO_FAILED"}}"#)
}

/// Settings rooted in `dir` with a fixed jitter seed.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.api.api_key = Some("test-key".to_string());
    settings.backoff.seed = Some(7);
    settings.poll.max_wait_secs = 600;
    settings.paths.prompt_file = dir.join("prompts.json");
    settings.paths.ledger_file = dir.join("jobs.json");
    settings.paths.output_dir = dir.join("out");
    settings.paths.archive_dir = dir.join("archive");
    settings
}

pub fn write_prompts(settings: &Settings, json: &str) {
    std::fs::write(&settings.paths.prompt_file, json).expect("write prompt file");
}

/// File names in `dir`, sorted.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
