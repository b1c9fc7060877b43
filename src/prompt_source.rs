//! Prompt file loading.
//!
//! The prompt file is a JSON document:
//!
//! ```json
//! {
//!   "meta": {"default_count": 2},
//!   "prompts": [
//!     {"title": "Summer Rain", "prompt": "dreamy synth pop", "params": "female vocals", "count": 1}
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PromptSourceError;

/// Batch-level defaults carried in the prompt file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMeta {
    #[serde(default)]
    pub default_count: Option<u32>,
}

/// One prompt entry. Every field is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "text")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

impl PromptEntry {
    /// Title, or `Prompt_<index>` when absent or blank.
    pub fn title_or_default(&self, index: u32) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("Prompt_{}", index),
        }
    }

    /// Trimmed prompt body; empty when missing.
    pub fn body(&self) -> &str {
        self.prompt.as_deref().map(str::trim).unwrap_or("")
    }

    /// Number of variants to render, falling back to the batch default.
    pub fn count_or(&self, default_count: u32) -> u32 {
        self.count.unwrap_or(default_count)
    }

    /// Body followed by `separator` and params, or the body alone when
    /// params are blank.
    pub fn prompt_text(&self, separator: &str) -> String {
        build_prompt_text(self.body(), self.params.as_deref().unwrap_or(""), separator)
    }
}

/// Joins body and params the way the create endpoint expects them.
pub fn build_prompt_text(body: &str, params: &str, separator: &str) -> String {
    let body = body.trim();
    let params = params.trim();
    if params.is_empty() {
        body.to_string()
    } else {
        format!("{}{}{}", body, separator, params)
    }
}

/// A loaded prompt file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBatch {
    #[serde(default)]
    pub meta: PromptMeta,
    #[serde(default)]
    pub prompts: Vec<PromptEntry>,
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl PromptBatch {
    /// Reads and validates a prompt file.
    ///
    /// # Errors
    ///
    /// `NotFound` when the file is absent, `NoPrompts` when the `prompts`
    /// array is missing or empty.
    pub fn load(path: &Path) -> Result<Self, PromptSourceError> {
        if !path.exists() {
            return Err(PromptSourceError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut batch: PromptBatch = serde_json::from_str(&raw)?;
        if batch.prompts.is_empty() {
            return Err(PromptSourceError::NoPrompts(path.to_path_buf()));
        }
        batch.source = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            prompts = batch.prompts.len(),
            renders = batch.total_renders(1),
            "Loaded prompt file"
        );
        Ok(batch)
    }

    pub fn from_entries(prompts: Vec<PromptEntry>) -> Self {
        Self {
            meta: PromptMeta::default(),
            prompts,
            source: None,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The file's `default_count`, else `fallback`.
    pub fn default_count(&self, fallback: u32) -> u32 {
        self.meta.default_count.unwrap_or(fallback)
    }

    /// Total variants requested across entries with a non-empty body.
    pub fn total_renders(&self, fallback: u32) -> u32 {
        let default_count = self.default_count(fallback);
        self.prompts
            .iter()
            .filter(|p| !p.body().is_empty())
            .map(|p| p.count_or(default_count))
            .sum()
    }
}
