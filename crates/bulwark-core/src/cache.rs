//! Cache store implementations.
//!
//! Two backends live here: [`MemoryCache`] (bounded, in-process, moka) and
//! [`FileCache`] (one file per key on local disk). A durable PostgreSQL
//! backend lives in `bulwark-db`. None of them expire entries by age; only
//! [`MemoryCache`] ever drops one, and only to stay within its capacity.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use moka::future::Cache;

use crate::error::AppError;
use crate::models::{CachedImage, ExtractionResult, compute_hash};
use crate::traits::CacheStore;

/// In-process cache backed by moka. No TTL.
///
/// Bounded by entry count: once `max_entries` is reached moka evicts the
/// least useful entries, so a dropped entry is simply re-extracted on its next
/// read. Use [`FileCache`] or the PostgreSQL backend where entries must never
/// be deleted automatically.
#[derive(Clone)]
pub struct MemoryCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> MemoryCache<V> {
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    /// Number of entries currently held (approximate, as reported by moka).
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> for MemoryCache<V> {
    async fn get(&self, key: &str) -> Result<Option<V>, AppError> {
        Ok(self.inner.get(key).await)
    }

    async fn set(&self, key: &str, value: &V) -> Result<(), AppError> {
        self.inner.insert(key.to_string(), value.clone()).await;
        Ok(())
    }
}

/// Byte encoding for values stored by [`FileCache`].
pub trait CacheCodec: Sized {
    /// File extension, without the dot.
    const EXTENSION: &'static str;

    fn encode(&self) -> Result<Vec<u8>, AppError>;

    fn decode(bytes: &[u8]) -> Result<Self, AppError>;
}

impl CacheCodec for ExtractionResult {
    const EXTENSION: &'static str = "json";

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ImageHeader {
    content_type: String,
    cache_control: String,
}

/// Layout: one JSON header line, `\n`, then the raw image bytes.
impl CacheCodec for CachedImage {
    const EXTENSION: &'static str = "img";

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        let header = serde_json::to_vec(&ImageHeader {
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
        })?;
        let mut out = Vec::with_capacity(header.len() + 1 + self.bytes.len());
        out.extend_from_slice(&header);
        out.push(b'\n');
        out.extend_from_slice(&self.bytes);
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| AppError::CacheError("image cache file has no header".to_string()))?;
        let header: ImageHeader = serde_json::from_slice(&bytes[..split])?;
        Ok(CachedImage {
            bytes: bytes[split + 1..].to_vec(),
            content_type: header.content_type,
            cache_control: header.cache_control,
        })
    }
}

/// On-disk cache: one file per key, named by the SHA-256 of the key.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a half-written entry.
pub struct FileCache<V> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for FileCache<V> {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V: CacheCodec> FileCache<V> {
    /// Create the cache, creating `dir` if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AppError::CacheError(format!("Failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            _marker: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", compute_hash(key), V::EXTENSION))
    }
}

impl<V: CacheCodec + Send + Sync> CacheStore<V> for FileCache<V> {
    async fn get(&self, key: &str) -> Result<Option<V>, AppError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => V::decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::CacheError(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set(&self, key: &str, value: &V) -> Result<(), AppError> {
        let path = self.path_for(key);
        let bytes = value.encode()?;
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let tmp = path.with_extension(format!("tmp-{nanos}"));

        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            AppError::CacheError(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::CacheError(format!("Failed to move {}: {e}", path.display()))
        })?;
        Ok(())
    }
}
