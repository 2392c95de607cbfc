//! Scoped key/value preferences for one user.
//!
//! Preferences are read in bulk on first access and memoised. Writes go to
//! the backend first; the memo reflects a write only once the backend has
//! confirmed it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{Error, Result, backend::PreferenceBackend, slot::Slot};

// ─── Types ───────────────────────────────────────────────────────────────────

/// Namespace of a preference key.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Scope {
  Default,
  Calendar,
  Addressbook,
  Tasklist,
}

/// One stored preference. `(owner, scope, name)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceEntry {
  pub owner: String,
  pub scope: Scope,
  pub name:  String,
  pub value: String,
}

impl PreferenceEntry {
  pub fn new(
    owner: impl Into<String>,
    scope: Scope,
    name: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    Self {
      owner: owner.into(),
      scope,
      name: name.into(),
      value: value.into(),
    }
  }
}

type PreferenceMap = BTreeMap<(Scope, String), PreferenceEntry>;

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PreferenceStore {
  entries: Slot<PreferenceMap>,
  changed: bool,
}

impl PreferenceStore {
  pub fn new() -> Self { Self::default() }

  pub fn is_loaded(&self) -> bool { self.entries.is_set() }

  async fn load<P: PreferenceBackend>(
    &mut self,
    backend: &P,
    owner: &str,
  ) -> Result<&mut PreferenceMap> {
    if self.entries.is_unset() {
      tracing::debug!(owner, "loading preferences");
      let list = backend.list_preferences(owner).await.map_err(Error::backend)?;
      let map: PreferenceMap = list
        .into_iter()
        .map(|entry| ((entry.scope, entry.name.clone()), entry))
        .collect();
      self.entries = if map.is_empty() { Slot::Empty } else { Slot::Value(map) };
      self.changed = true;
    }
    Ok(self.entries.get_or_insert_default())
  }

  /// Read a preference, loading every preference of `owner` on first use.
  pub async fn get<P: PreferenceBackend>(
    &mut self,
    backend: &P,
    owner: &str,
    scope: Scope,
    name: &str,
  ) -> Result<Option<String>> {
    let entries = self.load(backend, owner).await?;
    Ok(entries.get(&(scope, name.to_owned())).map(|e| e.value.clone()))
  }

  /// The memoised value, without triggering a load.
  pub fn cached(&self, scope: Scope, name: &str) -> Option<&str> {
    self
      .entries
      .value()?
      .get(&(scope, name.to_owned()))
      .map(|e| e.value.as_str())
  }

  /// Create or update a preference and persist it before returning.
  pub async fn set<P: PreferenceBackend>(
    &mut self,
    backend: &P,
    owner: &str,
    scope: Scope,
    name: &str,
    value: &str,
  ) -> Result<()> {
    let entries = self.load(backend, owner).await?;
    let key = (scope, name.to_owned());
    let mut entry = entries
      .get(&key)
      .cloned()
      .unwrap_or_else(|| PreferenceEntry::new(owner, scope, name, ""));
    entry.value = value.to_owned();

    let confirmed =
      backend.persist_preference(&entry).await.map_err(Error::backend)?;
    if !confirmed {
      tracing::warn!(owner, %scope, name, "preference write rejected");
      return Err(Error::rejected(format!("preference {scope}:{name}")));
    }

    let entries = self.entries.get_or_insert_default();
    entries.insert(key, entry);
    self.changed = true;
    Ok(())
  }

  /// Delete a preference. The memo entry is dropped whatever the backend
  /// answers.
  pub async fn delete<P: PreferenceBackend>(
    &mut self,
    backend: &P,
    owner: &str,
    scope: Scope,
    name: &str,
  ) -> Result<()> {
    let entries = self.load(backend, owner).await?;
    let key = (scope, name.to_owned());
    let entry = entries
      .get(&key)
      .cloned()
      .unwrap_or_else(|| PreferenceEntry::new(owner, scope, name, ""));

    let outcome = backend.delete_preference(&entry).await;

    if let Some(entries) = self.entries.value_mut() {
      entries.remove(&key);
    }
    self.changed = true;

    match outcome {
      Ok(true) => Ok(()),
      Ok(false) => {
        tracing::warn!(owner, %scope, name, "preference delete rejected");
        Err(Error::rejected(format!("preference {scope}:{name} deletion")))
      }
      Err(e) => Err(Error::backend(e)),
    }
  }

  pub fn invalidate(&mut self) {
    self.entries.clear();
    self.changed = true;
  }

  /// All memoised entries, for the cache mirror.
  pub fn snapshot(&self) -> Slot<Vec<PreferenceEntry>> {
    self.entries.map(|m| m.values().cloned().collect())
  }

  pub(crate) fn take_changed(&mut self) -> bool { std::mem::take(&mut self.changed) }
}
