//! Cache-aside helper over the key-value store.
//!
//! External lookups that are expensive but slow-moving (provider auth tokens,
//! the product catalog) go through [`KvCache::get_or_compute`]: a hit under
//! TTL short-circuits the computation, a miss computes, stores, and returns.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::{KeyValueStore, KvError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    #[error(transparent)]
    Store(#[from] KvError),
    #[error("Cached value is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Compute(E),
}

#[derive(Clone)]
pub struct KvCache {
    kv: Arc<dyn KeyValueStore>,
}

impl KvCache {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        KvCache { kv }
    }

    /// Returns the cached value under `key`, or runs `compute`, stores its
    /// result with `ttl`, and returns it.
    ///
    /// A computation failure is returned as [`CacheError::Compute`] and
    /// nothing is cached, so the next call retries.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(raw) = self.kv.get(key).await? {
            return Ok(serde_json::from_str(&raw)?);
        }
        let value = compute().await.map_err(CacheError::Compute)?;
        let raw = serde_json::to_string(&value)?;
        self.kv.set(key, raw, Some(ttl)).await?;
        Ok(value)
    }
}
