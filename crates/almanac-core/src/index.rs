//! Keyed family of independently memoised record sets.
//!
//! Share tiers and group queries are both "fetch the records matching this
//! key, wrap each one, index by id". [`LazyIndex`] holds one [`Slot`] per key;
//! populating one key never touches another.

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use crate::{
  Error, Result,
  backend::{DirectoryBackend, FetchOptions},
  resource::ResourceRecord,
  slot::Slot,
};

/// Wrapped objects indexed by record id.
pub type ObjectMap<V> = BTreeMap<String, Arc<V>>;

/// A wrapper type built from a backend record.
pub trait FromRecord {
  fn from_record(record: ResourceRecord) -> Self;
  fn record(&self) -> &ResourceRecord;
}

/// A key selecting one backend query.
pub trait IndexKey: Ord + Copy + fmt::Display + Send + Sync {
  fn fetch<'a, D: DirectoryBackend>(
    self,
    store: &'a D,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, D::Error>> + Send + 'a;
}

#[derive(Debug)]
pub struct LazyIndex<K, V> {
  slots:   BTreeMap<K, Slot<ObjectMap<V>>>,
  changed: bool,
}

impl<K, V> Default for LazyIndex<K, V> {
  fn default() -> Self {
    Self { slots: BTreeMap::new(), changed: false }
  }
}

impl<K: IndexKey, V: FromRecord> LazyIndex<K, V> {
  pub fn new() -> Self { Self::default() }

  /// Return the set for `key`, fetching it on first use.
  pub async fn get<D: DirectoryBackend>(
    &mut self,
    store: &D,
    owner: &str,
    key: K,
    options: &FetchOptions,
  ) -> Result<ObjectMap<V>> {
    if let Some(map) = self.cached(key) {
      tracing::trace!(%key, owner, "index hit");
      return Ok(map);
    }

    tracing::debug!(%key, owner, "fetching index");
    let records = key
      .fetch(store, owner, options)
      .await
      .map_err(Error::backend)?;
    Ok(self.populate(key, records))
  }

  /// The memoised set for `key`, or `None` while it is unset.
  pub fn cached(&self, key: K) -> Option<ObjectMap<V>> {
    self.slots.get(&key).and_then(Slot::computed)
  }

  pub fn is_populated(&self, key: K) -> bool {
    self.slots.get(&key).is_some_and(Slot::is_set)
  }

  /// Wrap and memoise `records` under `key`.
  pub fn populate(&mut self, key: K, records: Vec<ResourceRecord>) -> ObjectMap<V> {
    let map: ObjectMap<V> = records
      .into_iter()
      .map(|record| (record.id.clone(), Arc::new(V::from_record(record))))
      .collect();
    let slot = if map.is_empty() { Slot::Empty } else { Slot::Value(map.clone()) };
    self.slots.insert(key, slot);
    self.changed = true;
    map
  }

  pub fn invalidate(&mut self, key: K) {
    if self.slots.remove(&key).is_some() {
      self.changed = true;
    }
  }

  pub fn invalidate_all(&mut self) {
    if !self.slots.is_empty() {
      self.slots.clear();
      self.changed = true;
    }
  }

  /// The records behind every computed slot, for the cache mirror.
  pub fn snapshot(&self) -> BTreeMap<K, Slot<Vec<ResourceRecord>>> {
    self
      .slots
      .iter()
      .map(|(key, slot)| {
        (*key, slot.map(|m| m.values().map(|v| v.record().clone()).collect()))
      })
      .collect()
  }

  pub(crate) fn take_changed(&mut self) -> bool { std::mem::take(&mut self.changed) }
}
