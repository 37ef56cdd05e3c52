use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel stored in `archive_url` when no archived copy is known.
pub const NO_ARCHIVE: &str = "none";

/// Paragraph substituted when the direct fetch found no usable body text.
pub const NO_PARAGRAPHS_PLACEHOLDER: &str = "We reached the page, but could not find enough readable article text to show here. Open the original link to read the full story.";

/// Paragraph substituted when no extraction strategy produced content.
pub const UNAVAILABLE_PLACEHOLDER: &str = "The article text for this link is unavailable right now. Open the original link to read the full story.";

/// Title used when the document offers none.
pub const DEFAULT_TITLE: &str = "Untitled article";

/// Terminal outcome of one read attempt.
///
/// Serialized as its snake_case name. A status string the primary extractor
/// emits that is not listed here is kept verbatim in [`ExtractionStatus::Other`]
/// and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExtractionStatus {
    Success,
    Blocked,
    NotFound,
    Fallback,
    Error,
    Other(String),
}

impl ExtractionStatus {
    /// Statuses the primary strategy cannot resolve on its own.
    pub fn needs_fallback(&self) -> bool {
        matches!(self, ExtractionStatus::Blocked | ExtractionStatus::NotFound)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::Blocked => "blocked",
            ExtractionStatus::NotFound => "not_found",
            ExtractionStatus::Fallback => "fallback",
            ExtractionStatus::Error => "error",
            ExtractionStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for ExtractionStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => ExtractionStatus::Success,
            "blocked" => ExtractionStatus::Blocked,
            "not_found" => ExtractionStatus::NotFound,
            "fallback" => ExtractionStatus::Fallback,
            "error" => ExtractionStatus::Error,
            _ => ExtractionStatus::Other(raw),
        }
    }
}

impl From<ExtractionStatus> for String {
    fn from(status: ExtractionStatus) -> Self {
        match status {
            ExtractionStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured article content for one source URL. Also the cache entry.
///
/// Field names follow the JSON contract shared with the primary extractor
/// process (`originalUrl`, `archiveUrl`, `checkedAt`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub original_url: String,
    pub status: ExtractionStatus,
    #[serde(default = "default_archive_url")]
    pub archive_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub paragraphs: Vec<String>,
    #[serde(default = "Utc::now")]
    pub checked_at: DateTime<Utc>,
}

fn default_archive_url() -> String {
    NO_ARCHIVE.to_string()
}

impl ExtractionResult {
    /// Builds an `error` entry for `url` with a human-readable note.
    pub fn error(url: &str, notes: impl Into<String>) -> Self {
        Self {
            original_url: url.to_string(),
            status: ExtractionStatus::Error,
            archive_url: default_archive_url(),
            title: "Article unavailable".to_string(),
            notes: notes.into(),
            paragraphs: vec![UNAVAILABLE_PLACEHOLDER.to_string()],
            checked_at: Utc::now(),
        }
    }

    /// Fills any blank field so the entry is safe to cache.
    ///
    /// `original_url` is always reset to `url`, the cache key.
    pub fn normalized(mut self, url: &str) -> Self {
        self.original_url = url.to_string();
        if self.archive_url.trim().is_empty() {
            self.archive_url = default_archive_url();
        }
        if self.title.trim().is_empty() {
            self.title = DEFAULT_TITLE.to_string();
        }
        if self.notes.trim().is_empty() {
            self.notes = format!("Extraction finished with status {}.", self.status);
        }
        self.paragraphs.retain(|p| !p.trim().is_empty());
        if self.paragraphs.is_empty() {
            self.paragraphs.push(UNAVAILABLE_PLACEHOLDER.to_string());
        }
        self
    }
}

/// Outcome of one rate-limit check. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub ok: bool,
    pub remaining: u64,
    /// Epoch seconds at which the current window ends.
    pub reset_at: u64,
    pub limit: u64,
}

impl RateLimitDecision {
    /// Seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now_secs: u64) -> u64 {
        self.reset_at.saturating_sub(now_secs).max(1)
    }
}

/// Image bytes plus the headers needed to serve them again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// Raw origin response for an image request, before caching.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Origin `cache-control`, when it sent one.
    pub cache_control: Option<String>,
}

/// Result of one successful image proxy call.
#[derive(Debug, Clone)]
pub struct ProxiedImage {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
    pub cache_hit: bool,
}

/// Structured failure of one image proxy call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    /// HTTP status the caller should answer with.
    pub status: u16,
    pub error: String,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
