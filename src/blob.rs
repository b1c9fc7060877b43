//! Audio blob store.
//!
//! Downloads are written to `<name>.part` and renamed into place only after
//! the stream completes, so a file under its final name is always whole.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::BlobError;

/// Longest slug kept in a file name.
const SLUG_MAX_CHARS: usize = 64;

/// Extension used when the URL path has none.
const FALLBACK_EXT: &str = ".mp3";

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"[<>:"/\\|?*\n\r\t]+"#).expect("filename pattern is a valid regex")
    })
}

/// Filesystem-safe form of `text`: unsafe characters collapse to a single
/// separator, the result is cut to 64 characters, spaces become `_`.
/// Blank input yields `track`.
pub fn slug(text: &str) -> String {
    let cleaned = unsafe_chars().replace_all(text.trim(), " ");
    let cut: String = cleaned.trim().chars().take(SLUG_MAX_CHARS).collect();
    let cut = cut.trim();
    if cut.is_empty() {
        return "track".to_string();
    }
    cut.replace(' ', "_")
}

/// Lowercased extension (with dot) of the URL path, or `.mp3`.
pub fn extension_from_url(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let ext = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
        None => FALLBACK_EXT.to_string(),
    }
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Directory of downloaded audio files.
#[derive(Debug, Clone)]
pub struct BlobStore {
    out_dir: PathBuf,
}

impl BlobStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Creates the output directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), BlobError> {
        if !self.out_dir.exists() {
            fs::create_dir_all(&self.out_dir)
                .await
                .map_err(|e| BlobError::DirectoryCreationFailed {
                    path: self.out_dir.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// `<index:03>_<slug(title)>_v<variant>_<slug(job_id)><ext>`
    pub fn file_name(index: u32, title: &str, variant: u32, job_id: &str, url: &str) -> String {
        format!(
            "{:03}_{}_v{}_{}{}",
            index,
            slug(title),
            variant,
            slug(job_id),
            extension_from_url(url)
        )
    }

    /// Opens `<name>.part` for writing.
    pub async fn begin(&self, name: &str) -> Result<PendingBlob, BlobError> {
        self.ensure_dir().await?;
        let final_path = self.out_dir.join(name);
        let part_path = self.out_dir.join(format!("{}.part", name));
        let file = fs::File::create(&part_path).await?;
        Ok(PendingBlob {
            final_path,
            part_path,
            file,
        })
    }
}

/// A download in progress.
#[derive(Debug)]
pub struct PendingBlob {
    final_path: PathBuf,
    part_path: PathBuf,
    file: fs::File,
}

impl PendingBlob {
    /// Sink for the download stream.
    pub fn writer(&mut self) -> &mut fs::File {
        &mut self.file
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Syncs, checksums and renames the part file to its final name.
    pub async fn commit(mut self) -> Result<StoredBlob, BlobError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;
        let mut reader = fs::File::open(&self.part_path).await?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            bytes += n as u64;
        }
        drop(reader);

        fs::rename(&self.part_path, &self.final_path).await?;
        Ok(StoredBlob {
            path: self.final_path,
            bytes,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Removes the part file.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(err) = fs::remove_file(&self.part_path).await {
            tracing::warn!(path = %self.part_path.display(), error = %err, "Could not remove partial download");
        }
    }
}
