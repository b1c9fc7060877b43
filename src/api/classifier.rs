//! Maps raw API results to semantic outcomes.
//!
//! The classifier sees every call result the same way, whether the failure
//! was a transport error, a non-200 status, or a 200 whose body carries an
//! error code. Callers only branch on [`Outcome`].

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;

use super::search::search;
use super::ApiReply;
use crate::config::{ClassifierConfig, ResponseFields};
use crate::error::TransportError;

/// Longest body excerpt kept in a failure reason.
const BODY_EXCERPT_CHARS: usize = 200;

/// Why a retryable failure happened; informs logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitClass {
    RateLimited,
    Maintenance,
    ServerError,
    Network,
}

/// Status code (if any) and a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub http_status: Option<u16>,
    pub reason: String,
}

impl Failure {
    fn new(http_status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            http_status,
            reason: reason.into(),
        }
    }
}

/// Semantic result of one API call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Retryable {
        failure: Failure,
        class: WaitClass,
        retry_after: Option<Duration>,
    },
    Permanent(Failure),
    CreditExhausted(Failure),
    Unauthorized(Failure),
}

impl<T> Outcome<T> {
    /// Chains a fallible step on the success payload.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Success(value) => f(value),
            Outcome::Retryable {
                failure,
                class,
                retry_after,
            } => Outcome::Retryable {
                failure,
                class,
                retry_after,
            },
            Outcome::Permanent(f) => Outcome::Permanent(f),
            Outcome::CreditExhausted(f) => Outcome::CreditExhausted(f),
            Outcome::Unauthorized(f) => Outcome::Unauthorized(f),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Short explanation for well-known statuses.
pub fn explain(status: u16) -> &'static str {
    match status {
        400 => "invalid parameters (check prompt/JSON)",
        401 => "unauthorized: wrong or missing API key",
        404 => "wrong endpoint URL or unknown job",
        413 => "prompt too long",
        429 => "rate limited or out of credits",
        430 => "request frequency too high",
        455 => "service in maintenance",
        500 => "server error",
        502 => "gateway error",
        503 => "service temporarily unavailable",
        504 => "gateway timeout",
        _ => "unexpected status",
    }
}

/// Stateless classifier built from [`ClassifierConfig`].
#[derive(Debug, Clone)]
pub struct Classifier {
    retryable: BTreeSet<u16>,
    rate_limit: BTreeSet<u16>,
    credit_markers: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            retryable: config.retryable.iter().copied().collect(),
            rate_limit: config.rate_limit.iter().copied().collect(),
            credit_markers: config
                .credit_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Classifies a call result; success carries the parsed body.
    ///
    /// A body that is not JSON is kept as a JSON string so downstream
    /// field searches simply find nothing.
    pub fn classify(&self, result: Result<ApiReply, TransportError>) -> Outcome<Value> {
        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                return Outcome::Retryable {
                    failure: Failure::new(None, format!("network error: {}", err)),
                    class: WaitClass::Network,
                    retry_after: None,
                }
            }
        };

        if reply.status != 200 {
            return self.classify_status(reply.status, &reply.body, reply.retry_after);
        }

        let body: Value = serde_json::from_str(&reply.body)
            .unwrap_or_else(|_| Value::String(reply.body.clone()));

        if let Some(code) = embedded_error_code(&body) {
            let message = embedded_message(&body).unwrap_or_else(|| excerpt(&reply.body));
            let reason = format!("API error code {} in 200 response: {}", code, message);
            if self.is_credit_exhaustion(code, &reply.body) {
                return Outcome::CreditExhausted(Failure::new(Some(code), reason));
            }
            return Outcome::Permanent(Failure::new(Some(code), reason));
        }

        Outcome::Success(body)
    }

    /// Classifies a create call; success carries the remote job identifier.
    pub fn classify_create(
        &self,
        result: Result<ApiReply, TransportError>,
        fields: &ResponseFields,
    ) -> Outcome<String> {
        self.classify(result).and_then(|body| {
            match search(&body, &fields.job_id_keys, &fields.id_containers) {
                Some(job_id) => Outcome::Success(job_id),
                None => Outcome::Permanent(Failure::new(
                    Some(200),
                    format!("response missing job id: {}", excerpt(&body.to_string())),
                )),
            }
        })
    }

    fn classify_status(
        &self,
        status: u16,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Outcome<Value> {
        let reason = format!("HTTP {} ({}): {}", status, explain(status), excerpt(body));

        if status == 401 {
            return Outcome::Unauthorized(Failure::new(Some(status), reason));
        }
        if self.is_credit_exhaustion(status, body) {
            return Outcome::CreditExhausted(Failure::new(Some(status), reason));
        }
        if self.retryable.contains(&status) {
            let class = if self.rate_limit.contains(&status) {
                WaitClass::RateLimited
            } else if status == 455 {
                WaitClass::Maintenance
            } else {
                WaitClass::ServerError
            };
            return Outcome::Retryable {
                failure: Failure::new(Some(status), reason),
                class,
                retry_after,
            };
        }
        Outcome::Permanent(Failure::new(Some(status), reason))
    }

    fn is_credit_exhaustion(&self, status: u16, body: &str) -> bool {
        if !self.rate_limit.contains(&status) {
            return false;
        }
        let lowered = body.to_lowercase();
        self.credit_markers.iter().any(|m| lowered.contains(m))
    }
}

/// Returns the body's top-level `code` when it signals failure.
///
/// `0` and `200` are the success codes seen in the wild.
fn embedded_error_code(body: &Value) -> Option<u16> {
    let code = match body.get("code")? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    match code {
        0 | 200 => None,
        other => Some(u16::try_from(other).unwrap_or(u16::MAX)),
    }
}

fn embedded_message(body: &Value) -> Option<String> {
    ["msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(excerpt)
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        format!("{}...", cut)
    }
}
