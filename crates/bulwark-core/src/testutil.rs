//! Test utilities: mock implementations of the core ports.
//!
//! Handwritten mocks for dependency injection in unit tests. Each mock pops
//! queued responses from an `Arc<Mutex<Vec<_>>>` and counts its calls, so
//! clones handed to a pipeline can still be inspected by the test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::error::AppError;
use crate::models::{ExtractionResult, ExtractionStatus, FetchedImage, NO_ARCHIVE};
use crate::traits::{CacheStore, CounterBackend, ExtractorPort, ImageFetcher};
use crate::url_guard::ValidatedUrl;

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extraction strategy.
#[derive(Clone)]
pub struct MockExtractor {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns `default`.
    responses: Arc<Mutex<Vec<Result<ExtractionResult, AppError>>>>,
    default: ExtractionResult,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    /// Always returns `entry`.
    pub fn new(entry: ExtractionResult) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default: entry,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails once with `error`, then succeeds.
    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<ExtractionResult, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::new(make_test_entry(ExtractionStatus::Success))
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExtractorPort for MockExtractor {
    async fn extract(&self, _url: &ValidatedUrl) -> Result<ExtractionResult, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default.clone())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockImageFetcher
// ---------------------------------------------------------------------------

/// Mock image origin.
#[derive(Clone)]
pub struct MockImageFetcher {
    /// Queue of responses. If empty, returns a tiny PNG.
    responses: Arc<Mutex<Vec<Result<FetchedImage, AppError>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockImageFetcher {
    pub fn new(image: FetchedImage) -> Self {
        Self::with_responses(vec![Ok(image)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<FetchedImage, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageFetcher for MockImageFetcher {
    async fn fetch_image(&self, _url: &ValidatedUrl) -> Result<FetchedImage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(make_test_image("image/png", None))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockCounter
// ---------------------------------------------------------------------------

/// Mock distributed counter.
#[derive(Clone)]
pub struct MockCounter {
    /// Queue of counts. If empty, counts up from 1 per call.
    counts: Arc<Mutex<Vec<Result<u64, AppError>>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockCounter {
    pub fn with_counts(counts: Vec<Result<u64, AppError>>) -> Self {
        Self {
            counts: Arc::new(Mutex::new(counts)),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A counter that answers only after `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::with_counts(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CounterBackend for MockCounter {
    async fn increment(&self, _key: &str, _ttl_secs: u64) -> Result<u64, AppError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut counts = self.counts.lock().unwrap();
        if counts.is_empty() {
            Ok(call)
        } else {
            counts.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// FailingCache
// ---------------------------------------------------------------------------

/// Cache whose every read and write fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCache;

impl<V: Send + Sync> CacheStore<V> for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<V>, AppError> {
        Err(AppError::CacheError("backend unavailable".into()))
    }

    async fn set(&self, _key: &str, _value: &V) -> Result<(), AppError> {
        Err(AppError::CacheError("backend unavailable".into()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// An extraction entry for `https://news.example/story` with the given status.
pub fn make_test_entry(status: ExtractionStatus) -> ExtractionResult {
    ExtractionResult {
        original_url: "https://news.example/story".into(),
        status: status.clone(),
        archive_url: NO_ARCHIVE.into(),
        title: "Test headline".into(),
        notes: format!("test entry ({status})"),
        paragraphs: vec![
            "First paragraph of the test article, long enough to count as body text.".into(),
            "Second paragraph of the test article.".into(),
        ],
        checked_at: Utc::now(),
    }
}

pub fn make_test_image(content_type: &str, cache_control: Option<&str>) -> FetchedImage {
    FetchedImage {
        bytes: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
        content_type: content_type.to_string(),
        cache_control: cache_control.map(str::to_string),
    }
}
