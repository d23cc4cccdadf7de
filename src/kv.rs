//! Key-value store abstraction backing quotes, spent hashes, and caches.
//!
//! The store maps string keys to JSON string values with an optional TTL.
//! Beyond plain get/set it exposes two atomic primitives the settlement flow
//! depends on:
//!
//! - [`KeyValueStore::set_if_absent`] — check-and-write as a single
//!   operation, the spend-ledger idempotency guard;
//! - [`KeyValueStore::compare_and_swap`] — conditional replace keyed on the
//!   current value, the at-most-once quote status transition.
//!
//! The store is constructed at service start and shared as
//! `Arc<dyn KeyValueStore>`; individual keys are the unit of coordination.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The backend rejected or failed the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a [`KeyValueStore::compare_and_swap`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched the expectation and was replaced.
    Swapped,
    /// The key does not exist (or its TTL has lapsed).
    Missing,
    /// The stored value no longer matches the expectation.
    Conflict,
}

/// Durable mapping from string key to JSON string value with optional TTL.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Unconditionally writes `value` under `key`. A `ttl` of `None` means
    /// the key never expires.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Writes `value` under `key` only if the key is absent. Returns whether
    /// this call created the key. Check and write are a single atomic step.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError>;

    /// Replaces the value under `key` only if the current value equals
    /// `expected`. A `ttl` of `None` preserves the key's remaining TTL.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<CasOutcome, KvError>;
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        StoredValue {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`KeyValueStore`] over a concurrent hash map.
///
/// Expired entries are dropped lazily when touched; the DashMap entry API
/// makes `set_if_absent` and `compare_and_swap` genuinely atomic since the
/// shard lock is held across check and write.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, StoredValue>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop the read guard before removing, DashMap deadlocks otherwise.
        self.entries.remove_if(key, |_, stored| stored.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<CasOutcome, KvError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    return Ok(CasOutcome::Missing);
                }
                if occupied.get().value != expected {
                    return Ok(CasOutcome::Conflict);
                }
                let expires_at = match ttl {
                    Some(ttl) => Some(Instant::now() + ttl),
                    None => occupied.get().expires_at,
                };
                occupied.insert(StoredValue { value, expires_at });
                Ok(CasOutcome::Swapped)
            }
            Entry::Vacant(_) => Ok(CasOutcome::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let kv = MemoryKv::new();
        kv.set("a", "1".to_string(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let kv = MemoryKv::new();
        kv.set("a", "1".to_string(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
        // An expired key is absent for set_if_absent purposes too.
        assert!(
            kv.set_if_absent("a", "2".to_string(), None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn set_if_absent_admits_one_winner() {
        let kv = Arc::new(MemoryKv::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let kv = Arc::clone(&kv);
            handles.push(tokio::spawn(async move {
                kv.set_if_absent("hash", format!("writer-{i}"), None)
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn compare_and_swap_outcomes() {
        let kv = MemoryKv::new();
        assert_eq!(
            kv.compare_and_swap("k", "old", "new".to_string(), None)
                .await
                .unwrap(),
            CasOutcome::Missing
        );
        kv.set("k", "old".to_string(), None).await.unwrap();
        assert_eq!(
            kv.compare_and_swap("k", "stale", "new".to_string(), None)
                .await
                .unwrap(),
            CasOutcome::Conflict
        );
        assert_eq!(
            kv.compare_and_swap("k", "old", "new".to_string(), None)
                .await
                .unwrap(),
            CasOutcome::Swapped
        );
        assert_eq!(kv.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test]
    async fn compare_and_swap_is_exclusive_under_contention() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("status", "PENDING".to_string(), None).await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let kv = Arc::clone(&kv);
            handles.push(tokio::spawn(async move {
                kv.compare_and_swap("status", "PENDING", "PAYMENT_RECEIVED".to_string(), None)
                    .await
                    .unwrap()
            }));
        }
        let mut swapped = 0;
        for handle in handles {
            if handle.await.unwrap() == CasOutcome::Swapped {
                swapped += 1;
            }
        }
        assert_eq!(swapped, 1);
    }
}
