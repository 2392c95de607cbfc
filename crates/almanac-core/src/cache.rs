//! Best-effort mirror of a user's memoised state into an external cache.
//!
//! The in-process memo is always authoritative. Syncing is fire-and-forget:
//! a failed `put` is logged and otherwise ignored.

use std::{
  collections::BTreeMap,
  fmt,
  future::Future,
  num::NonZeroUsize,
  sync::Arc,
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
  collection::CollectionSnapshot,
  group::GroupQuery,
  identity::UserRecord,
  preference::PreferenceEntry,
  resource::{ResourceKind, ResourceRecord},
  share::ShareTier,
  slot::Slot,
};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
  #[error("cache unavailable: {0}")]
  Unavailable(String),
  #[error("cache operation failed: {0}")]
  OperationFailed(String),
  #[error("serialization error: {0}")]
  Serialization(String),
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// `(aggregate kind, aggregate id, server)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub aggregate: &'static str,
  pub id:        String,
  pub server:    String,
}

impl CacheKey {
  pub fn user(server: &str, uid: &str) -> Self {
    Self {
      aggregate: "user",
      id:        uid.to_owned(),
      server:    server.to_owned(),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.aggregate, self.server, self.id)
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// The cacheable subset of a user's memo. Backend handles are not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
  pub uid:         Option<String>,
  pub email:       Option<String>,
  pub server:      String,
  pub is_loaded:   Option<bool>,
  pub exists:      Option<bool>,
  pub record:      Option<UserRecord>,
  pub preferences: Slot<Vec<PreferenceEntry>>,
  pub resources:   BTreeMap<ResourceKind, CollectionSnapshot>,
  pub shares:      BTreeMap<ShareTier, Slot<Vec<ResourceRecord>>>,
  pub groups:      BTreeMap<GroupQuery, Slot<Vec<ResourceRecord>>>,
  pub synced_at:   DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A process-external key/value cache. Only writes are needed.
pub trait ExternalCache: Send + Sync {
  fn put<'a>(
    &'a self,
    key: &'a str,
    blob: Vec<u8>,
  ) -> impl Future<Output = Result<(), CacheError>> + Send + 'a;
}

impl<C: ExternalCache> ExternalCache for Arc<C> {
  fn put<'a>(
    &'a self,
    key: &'a str,
    blob: Vec<u8>,
  ) -> impl Future<Output = Result<(), CacheError>> + Send + 'a {
    (**self).put(key, blob)
  }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ExternalCache for NoCache {
  async fn put(&self, _key: &str, _blob: Vec<u8>) -> Result<(), CacheError> { Ok(()) }
}

// ─── In-memory cache ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry {
  value:      Vec<u8>,
  expires_at: Option<Instant>,
}

impl CacheEntry {
  fn is_expired(&self) -> bool {
    self.expires_at.is_some_and(|exp| Instant::now() > exp)
  }
}

/// LRU cache with an optional TTL, shared between clones.
#[derive(Debug, Clone)]
pub struct MemoryCache {
  store: Arc<Mutex<LruCache<String, CacheEntry>>>,
  ttl:   Option<Duration>,
}

impl MemoryCache {
  /// A cache holding at most `max_entries` (at least one) entries.
  pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
    let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
    Self { store: Arc::new(Mutex::new(LruCache::new(capacity))), ttl }
  }

  pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
    let mut store = self.store.lock().await;
    match store.get(key) {
      Some(entry) if entry.is_expired() => {
        store.pop(key);
        None
      }
      Some(entry) => Some(entry.value.clone()),
      None => None,
    }
  }

  /// Decode the snapshot stored under `key`.
  pub async fn snapshot(&self, key: &CacheKey) -> Option<CacheSnapshot> {
    let bytes = self.get(&key.to_string()).await?;
    serde_json::from_slice(&bytes).ok()
  }

  pub async fn len(&self) -> usize { self.store.lock().await.len() }
}

impl ExternalCache for MemoryCache {
  async fn put(&self, key: &str, blob: Vec<u8>) -> Result<(), CacheError> {
    let entry = CacheEntry {
      value:      blob,
      expires_at: self.ttl.map(|d| Instant::now() + d),
    };
    self.store.lock().await.put(key.to_owned(), entry);
    Ok(())
  }
}

// ─── Sync ────────────────────────────────────────────────────────────────────

/// Serialises snapshots and hands them to an [`ExternalCache`].
#[derive(Debug)]
pub struct CacheSync<C> {
  cache:   C,
  enabled: bool,
}

impl<C: ExternalCache> CacheSync<C> {
  pub fn new(cache: C) -> Self { Self { cache, enabled: true } }

  /// A sync that never writes.
  pub fn disabled(cache: C) -> Self { Self { cache, enabled: false } }

  pub fn is_enabled(&self) -> bool { self.enabled }

  /// Store `snapshot` under `key`. Returns whether the cache accepted it;
  /// failures are logged and never propagated.
  pub async fn sync(&self, key: &CacheKey, snapshot: &CacheSnapshot) -> bool {
    if !self.enabled {
      return false;
    }

    let blob = match serde_json::to_vec(snapshot) {
      Ok(blob) => blob,
      Err(e) => {
        let err = CacheError::Serialization(e.to_string());
        tracing::warn!(%key, error = %err, "cache sync skipped");
        return false;
      }
    };

    let key_str = key.to_string();
    match self.cache.put(&key_str, blob).await {
      Ok(()) => {
        tracing::trace!(%key, "cache synced");
        true
      }
      Err(e) => {
        tracing::warn!(%key, error = %e, "cache sync failed");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FailingCache;

  impl ExternalCache for FailingCache {
    async fn put(&self, _key: &str, _blob: Vec<u8>) -> Result<(), CacheError> {
      Err(CacheError::Unavailable("connection refused".into()))
    }
  }

  fn snapshot() -> CacheSnapshot {
    CacheSnapshot {
      uid:         Some("alice".into()),
      email:       None,
      server:      "default".into(),
      is_loaded:   Some(true),
      exists:      None,
      record:      None,
      preferences: Slot::Unset,
      resources:   BTreeMap::new(),
      shares:      BTreeMap::from([(ShareTier::Send, Slot::Empty)]),
      groups:      BTreeMap::new(),
      synced_at:   Utc::now(),
    }
  }

  #[test]
  fn key_layout() {
    assert_eq!(CacheKey::user("ldap-a", "alice").to_string(), "user:ldap-a:alice");
  }

  #[tokio::test]
  async fn memory_cache_round_trips_snapshot() {
    let cache = Arc::new(MemoryCache::new(8, None));
    let sync = CacheSync::new(Arc::clone(&cache));
    let key = CacheKey::user("default", "alice");

    assert!(sync.sync(&key, &snapshot()).await);

    let stored = cache.snapshot(&key).await.unwrap();
    assert_eq!(stored.uid.as_deref(), Some("alice"));
    assert_eq!(stored.shares[&ShareTier::Send], Slot::Empty);
  }

  #[tokio::test]
  async fn failing_cache_is_not_fatal() {
    let sync = CacheSync::new(FailingCache);
    assert!(!sync.sync(&CacheKey::user("default", "alice"), &snapshot()).await);
  }

  #[tokio::test]
  async fn disabled_sync_writes_nothing() {
    let cache = Arc::new(MemoryCache::new(8, None));
    let sync = CacheSync::disabled(Arc::clone(&cache));
    assert!(!sync.sync(&CacheKey::user("default", "alice"), &snapshot()).await);
    assert_eq!(cache.len().await, 0);
  }

  #[tokio::test]
  async fn expired_entries_are_dropped() {
    let cache = MemoryCache::new(8, Some(Duration::ZERO));
    cache.put("k", b"v".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(cache.get("k").await, None);
  }

  #[tokio::test]
  async fn lru_evicts_oldest() {
    let cache = MemoryCache::new(1, None);
    cache.put("a", b"1".to_vec()).await.unwrap();
    cache.put("b", b"2".to_vec()).await.unwrap();
    assert_eq!(cache.get("a").await, None);
    assert_eq!(cache.get("b").await, Some(b"2".to_vec()));
  }
}
