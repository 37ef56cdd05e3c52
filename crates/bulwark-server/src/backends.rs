//! Cache backend picked at startup from configuration.

use bulwark_core::cache::{CacheCodec, FileCache, MemoryCache};
use bulwark_core::error::AppError;
use bulwark_core::traits::CacheStore;

/// One of the cache backends, selected by `BULWARK_CACHE_BACKEND`.
#[derive(Clone)]
pub enum CacheBackend<V, P>
where
    V: Clone + Send + Sync + 'static,
{
    Memory(MemoryCache<V>),
    File(FileCache<V>),
    Postgres(P),
}

impl<V, P> CacheStore<V> for CacheBackend<V, P>
where
    V: CacheCodec + Clone + Send + Sync + 'static,
    P: CacheStore<V>,
{
    async fn get(&self, key: &str) -> Result<Option<V>, AppError> {
        match self {
            CacheBackend::Memory(c) => c.get(key).await,
            CacheBackend::File(c) => c.get(key).await,
            CacheBackend::Postgres(c) => c.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &V) -> Result<(), AppError> {
        match self {
            CacheBackend::Memory(c) => c.set(key, value).await,
            CacheBackend::File(c) => c.set(key, value).await,
            CacheBackend::Postgres(c) => c.set(key, value).await,
        }
    }
}
