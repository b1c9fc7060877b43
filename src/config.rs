//! Runtime configuration for songbatch.
//!
//! All tunables live in one [`Settings`] value that is built once (defaults,
//! then an optional YAML file, then CLI flags) and threaded into each
//! component at construction time. Nothing reads ambient global state.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default base URL of the generation API.
pub const DEFAULT_API_URL: &str = "https://api.suno.ai/v1";

/// Environment variable holding the bearer token.
pub const API_KEY_ENV: &str = "SUNO_API_KEY";

/// Environment variable overriding the base URL.
pub const API_URL_ENV: &str = "SUNO_API_URL";

/// Complete configuration for a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiConfig,
    pub backoff: BackoffConfig,
    pub classifier: ClassifierConfig,
    pub fields: ResponseFields,
    pub vocabulary: StatusVocabulary,
    pub create: CreateConfig,
    pub poll: PollConfig,
    pub paths: PathsConfig,
}

impl Settings {
    /// Loads settings from an optional YAML file, falling back to defaults
    /// for every field the file leaves out.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }

    /// Checks value ranges that would otherwise surface as odd runtime
    /// behavior (zero attempts, negative delays).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url", "must not be empty"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(invalid("api.request_timeout_secs", "must be > 0"));
        }
        if self.create.max_attempts == 0 {
            return Err(invalid("create.max_attempts", "must be >= 1"));
        }
        if self.create.default_count == 0 {
            return Err(invalid("create.default_count", "must be >= 1"));
        }
        if self.poll.max_cycles == 0 {
            return Err(invalid("poll.max_cycles", "must be >= 1"));
        }
        if !positive(self.poll.interval_secs) {
            return Err(invalid("poll.interval_secs", "must be a finite number > 0"));
        }
        let b = &self.backoff;
        if !positive(b.base_secs) || !positive(b.cap_secs) || b.cap_secs < b.base_secs {
            return Err(invalid("backoff", "need 0 < base_secs <= cap_secs, both finite"));
        }
        if !(b.jitter_secs.is_finite() && b.jitter_secs >= 0.0) || !positive(b.floor_secs) {
            return Err(invalid("backoff", "need finite jitter_secs >= 0 and floor_secs > 0"));
        }
        Ok(())
    }
}

fn positive(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// How the status endpoint expects the job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMethod {
    /// `POST <status_url>` with `{"<id_field>": "<job id>"}`.
    Post,
    /// `GET <status_url>?<id_field>=<job id>`.
    Get,
}

/// Connection settings for the generation API.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token. Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub create_path: String,
    pub status_path: String,
    pub status_method: StatusMethod,
    pub status_id_field: String,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            create_path: "/generate".to_string(),
            status_path: "/status".to_string(),
            status_method: StatusMethod::Post,
            status_id_field: "job_id".to_string(),
            request_timeout_secs: 60,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .field("create_path", &self.create_path)
            .field("status_path", &self.status_path)
            .field("status_method", &self.status_method)
            .field("status_id_field", &self.status_id_field)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .finish()
    }
}

impl ApiConfig {
    /// Reads `SUNO_API_KEY` (required) and `SUNO_API_URL` (optional).
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key =
            env::var(API_KEY_ENV).map_err(|_| ConfigError::MissingEnvVar(API_KEY_ENV.into()))?;
        let base_url = env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Ok(Self {
            base_url,
            api_key: Some(api_key),
            ..Self::default()
        })
    }

    /// Returns the bearer token or [`ConfigError::MissingApiKey`].
    pub fn require_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    pub fn create_url(&self) -> String {
        join_endpoint(&self.base_url, &self.create_path)
    }

    pub fn status_url(&self) -> String {
        join_endpoint(&self.base_url, &self.status_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Appends `suffix` to `base` unless the base URL already ends with it.
///
/// Operators routinely paste the full endpoint into `SUNO_API_URL`.
pub fn join_endpoint(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches('/');
    let suffix = format!("/{}", suffix.trim_matches('/'));
    if base.ends_with(&suffix) {
        base.to_string()
    } else {
        format!("{}{}", base, suffix)
    }
}

/// Masks all but the first and last four characters of a secret.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Exponential backoff parameters, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: f64,
    pub cap_secs: f64,
    pub jitter_secs: f64,
    /// Lower bound on any computed delay.
    pub floor_secs: f64,
    /// Fixed seed for the jitter RNG; random when unset.
    pub seed: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 1.5,
            cap_secs: 30.0,
            jitter_secs: 0.5,
            floor_secs: 0.1,
            seed: None,
        }
    }
}

/// Status-code sets driving the HTTP result classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub retryable: Vec<u16>,
    /// Subset of statuses where a credit marker means billing exhaustion.
    pub rate_limit: Vec<u16>,
    /// Case-insensitive substrings that identify credit exhaustion.
    pub credit_markers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            retryable: vec![429, 430, 455, 500, 502, 503, 504],
            rate_limit: vec![429, 430],
            credit_markers: vec!["credit".to_string(), "insufficient".to_string()],
        }
    }
}

/// Where the API may put the fields we need.
///
/// The upstream API moves identifiers between top-level keys and nested
/// containers across versions; every name here is searched in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseFields {
    pub job_id_keys: Vec<String>,
    pub status_keys: Vec<String>,
    pub audio_url_keys: Vec<String>,
    pub id_containers: Vec<String>,
    pub audio_containers: Vec<String>,
}

impl Default for ResponseFields {
    fn default() -> Self {
        Self {
            job_id_keys: strings(&["job_id", "jobId", "taskId", "task_id"]),
            status_keys: strings(&["status", "state", "phase"]),
            audio_url_keys: strings(&[
                "audio_url",
                "audioUrl",
                "mp3_url",
                "mp3Url",
                "audio",
                "streamAudioUrl",
                "stream_audio_url",
            ]),
            id_containers: strings(&["data", "response", "result", "results", "task", "job"]),
            audio_containers: strings(&[
                "data", "response", "result", "results", "sunoData", "clips", "songs", "tracks",
                "items", "output",
            ]),
        }
    }
}

/// Class of an upstream job status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Pending,
    Succeeded,
    Failed,
}

/// Allow-lists of upstream status labels.
///
/// Different API versions disagree on both vocabulary and casing, so the
/// lists are configuration and matching is case-insensitive unless
/// `case_sensitive` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusVocabulary {
    pub pending: Vec<String>,
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for StatusVocabulary {
    fn default() -> Self {
        Self {
            pending: strings(&[
                "PENDING",
                "QUEUED",
                "SUBMITTED",
                "RUNNING",
                "PROCESSING",
                "GENERATING",
                "IN_PROGRESS",
                "STREAMING",
                "TEXT_SUCCESS",
                "FIRST_SUCCESS",
            ]),
            success: strings(&["SUCCESS", "SUCCEEDED", "COMPLETED", "COMPLETE", "DONE", "FINISHED"]),
            failure: strings(&[
                "FAILED",
                "FAILURE",
                "ERROR",
                "CANCELLED",
                "CANCELED",
                "CREATE_TASK_FAILED",
                "GENERATE_AUDIO_FAILED",
                "CALLBACK_EXCEPTION",
                "SENSITIVE_WORD_ERROR",
            ]),
            case_sensitive: false,
        }
    }
}

impl StatusVocabulary {
    /// Looks a label up in the allow-lists. Unknown labels return `None`.
    pub fn classify(&self, label: &str) -> Option<StatusClass> {
        let label = label.trim();
        let matches = |list: &[String]| {
            list.iter().any(|candidate| {
                if self.case_sensitive {
                    candidate == label
                } else {
                    candidate.eq_ignore_ascii_case(label)
                }
            })
        };
        if matches(&self.failure) {
            Some(StatusClass::Failed)
        } else if matches(&self.success) {
            Some(StatusClass::Succeeded)
        } else if matches(&self.pending) {
            Some(StatusClass::Pending)
        } else {
            None
        }
    }
}

/// Creation flow tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateConfig {
    pub max_attempts: u32,
    /// Pause between variants regardless of outcome, in milliseconds.
    pub courtesy_pause_ms: u64,
    /// Variants per prompt when neither the entry nor the prompt file say.
    pub default_count: u32,
    /// Separator between prompt body and parameter hints.
    pub params_separator: String,
}

impl Default for CreateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            courtesy_pause_ms: 150,
            default_count: 1,
            params_separator: " || ".to_string(),
        }
    }
}

impl CreateConfig {
    pub fn courtesy_pause(&self) -> Duration {
        Duration::from_millis(self.courtesy_pause_ms)
    }
}

/// Polling flow tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Status requests per record before giving up for this run.
    pub max_cycles: u32,
    /// Steady-state cadence between status checks, in seconds.
    pub interval_secs: f64,
    /// Wall-clock budget for the whole polling run, in seconds.
    pub max_wait_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_cycles: 1000,
            interval_secs: 2.5,
            max_wait_secs: 1800,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// File locations used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub prompt_file: PathBuf,
    pub ledger_file: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prompt_file: PathBuf::from("prompts.json"),
            ledger_file: PathBuf::from("jobs.json"),
            output_dir: PathBuf::from("out"),
            archive_dir: PathBuf::from("archive"),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.create.max_attempts, 7);
        assert_eq!(settings.create.courtesy_pause(), Duration::from_millis(150));
        assert_eq!(settings.poll.max_cycles, 1000);
        assert_eq!(settings.poll.max_wait(), Duration::from_secs(1800));
        assert_eq!(settings.backoff.base_secs, 1.5);
        assert_eq!(settings.backoff.cap_secs, 30.0);
        assert_eq!(settings.backoff.jitter_secs, 0.5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_join_endpoint() {
        assert_eq!(
            join_endpoint("https://api.example.com/v1/", "/generate"),
            "https://api.example.com/v1/generate"
        );
        assert_eq!(
            join_endpoint("https://api.example.com/v1/generate", "/generate"),
            "https://api.example.com/v1/generate"
        );
        assert_eq!(
            join_endpoint("https://api.example.com/v1", "status"),
            "https://api.example.com/v1/status"
        );
    }

    #[test]
    fn test_require_key() {
        let mut api = ApiConfig::default();
        assert!(matches!(api.require_key(), Err(ConfigError::MissingApiKey)));

        api.api_key = Some("   ".to_string());
        assert!(matches!(api.require_key(), Err(ConfigError::MissingApiKey)));

        api.api_key = Some("sk-test-1234567890".to_string());
        assert_eq!(api.require_key().expect("key present"), "sk-test-1234567890");
    }

    #[test]
    fn test_debug_masks_api_key() {
        let api = ApiConfig {
            api_key: Some("sk-secret-abcdef-9999".to_string()),
            ..ApiConfig::default()
        };
        let debug = format!("{:?}", api);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("sk-s...9999"));
        assert_eq!(mask_key("short"), "*****");
    }

    #[test]
    fn test_mask_key_handles_multibyte_chars() {
        assert_eq!(mask_key("ключ-1234567890-ключ"), "ключ...ключ");
        assert_eq!(mask_key("éééééééé"), "********");
        assert_eq!(mask_key("ab€cdefgh€ij"), "ab€c...h€ij");
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "create:\n  max_attempts: 3\npoll:\n  interval_secs: 1.0\nvocabulary:\n  case_sensitive: true"
        )
        .expect("write yaml");

        let settings = Settings::load(Some(file.path())).expect("load settings");
        assert_eq!(settings.create.max_attempts, 3);
        assert_eq!(settings.create.courtesy_pause_ms, 150);
        assert_eq!(settings.poll.interval(), Duration::from_secs(1));
        assert!(settings.vocabulary.case_sensitive);
        assert_eq!(settings.api.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Settings::load(Some(Path::new("/definitely/not/here.yaml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.create.max_attempts = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "create.max_attempts"
        ));

        let mut settings = Settings::default();
        settings.backoff.cap_secs = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_durations() {
        let mut settings = Settings::default();
        settings.poll.interval_secs = f64::INFINITY;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "poll.interval_secs"
        ));

        let mut settings = Settings::default();
        settings.poll.interval_secs = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.backoff.jitter_secs = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.backoff.cap_secs = f64::INFINITY;
        assert!(settings.validate().is_err());

        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_vocabulary_case_handling() {
        let vocab = StatusVocabulary::default();
        assert_eq!(vocab.classify("completed"), Some(StatusClass::Succeeded));
        assert_eq!(vocab.classify("SUCCESS"), Some(StatusClass::Succeeded));
        assert_eq!(vocab.classify("Failed"), Some(StatusClass::Failed));
        assert_eq!(vocab.classify("text_success"), Some(StatusClass::Pending));
        assert_eq!(vocab.classify("mystery"), None);

        let strict = StatusVocabulary {
            case_sensitive: true,
            ..StatusVocabulary::default()
        };
        assert_eq!(strict.classify("completed"), None);
        assert_eq!(strict.classify("COMPLETED"), Some(StatusClass::Succeeded));
    }
}
