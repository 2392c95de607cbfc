//! Owned/shared partitioning and lazy fetch for one resource kind.
//!
//! `shared` is the superset (everything the user can reach), `owned` the
//! subset whose owner is the user. When `shared` is already in memory, `owned`
//! is derived from it rather than fetched; the reverse never happens.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  backend::{DirectoryBackend, FetchOptions, PreferenceBackend},
  preference::{PreferenceStore, Scope},
  resource::{
    DefaultTarget, Resource, ResourceKind, ResourceMap, ResourceRecord, index_records,
  },
  slot::Slot,
};

/// Calendar preference listing the calendars shown to the user.
pub const DISPLAY_LIST_PREFERENCE: &str = "display_cals";
const EMPTY_DISPLAY_LIST: &str = "[]";

/// Outcome of re-reading a memoised partition.
pub(crate) enum Reuse {
  Unset,
  Live(ResourceMap),
  /// At least one entry had been invalidated; the partition was cleared.
  Stale,
}

#[derive(Debug)]
pub struct ResourceCollection {
  kind:           ResourceKind,
  owned_options:  FetchOptions,
  shared_options: FetchOptions,
  pub(crate) owned:   Slot<ResourceMap>,
  pub(crate) shared:  Slot<ResourceMap>,
  pub(crate) default: Slot<Arc<Resource>>,
  pub(crate) changed: bool,
}

impl ResourceCollection {
  pub fn new(
    kind: ResourceKind,
    owned_options: FetchOptions,
    shared_options: FetchOptions,
  ) -> Self {
    Self {
      kind,
      owned_options,
      shared_options,
      owned: Slot::Unset,
      shared: Slot::Unset,
      default: Slot::Unset,
      changed: false,
    }
  }

  pub fn kind(&self) -> ResourceKind { self.kind }

  pub fn owned(&self) -> &Slot<ResourceMap> { &self.owned }

  pub fn shared(&self) -> &Slot<ResourceMap> { &self.shared }

  pub fn default_slot(&self) -> &Slot<Arc<Resource>> { &self.default }

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Resources of this kind owned by `uid`.
  pub async fn get_owned<D: DirectoryBackend>(
    &mut self,
    store: &D,
    uid: &str,
  ) -> Result<ResourceMap> {
    match self.revalidate_owned(uid) {
      Reuse::Live(owned) => return Ok(owned),
      Reuse::Unset | Reuse::Stale => {}
    }

    match self.revalidate_shared(uid) {
      Reuse::Live(shared) => {
        let owned: ResourceMap = shared
          .into_iter()
          .filter(|(_, r)| r.is_owned_by(uid))
          .collect();
        self.owned = slot_of(owned.clone());
        self.changed = true;
        return Ok(owned);
      }
      Reuse::Stale => {
        self.owned.clear();
      }
      Reuse::Unset => {}
    }

    tracing::debug!(kind = %self.kind, uid, "fetching owned resources");
    let records = store
      .fetch_owned(self.kind, uid, &self.owned_options)
      .await
      .map_err(Error::backend)?;
    let owned = index_records(self.kind, uid, records);
    self.owned = slot_of(owned.clone());
    self.changed = true;
    Ok(owned)
  }

  /// Every resource of this kind `uid` can access.
  pub async fn get_shared<D: DirectoryBackend>(
    &mut self,
    store: &D,
    uid: &str,
  ) -> Result<ResourceMap> {
    if let Reuse::Live(shared) = self.revalidate_shared(uid) {
      return Ok(shared);
    }

    tracing::debug!(kind = %self.kind, uid, "fetching shared resources");
    let records = store
      .fetch_shared(self.kind, uid, &self.shared_options)
      .await
      .map_err(Error::backend)?;
    let shared = index_records(self.kind, uid, records);
    self.shared = slot_of(shared.clone());
    self.changed = true;
    Ok(shared)
  }

  pub(crate) fn revalidate_owned(&mut self, uid: &str) -> Reuse {
    let reuse = revalidate(&mut self.owned, uid);
    if matches!(reuse, Reuse::Stale) {
      tracing::warn!(kind = %self.kind, uid, "stale owned resource, refetching");
      self.changed = true;
    }
    reuse
  }

  pub(crate) fn revalidate_shared(&mut self, uid: &str) -> Reuse {
    let reuse = revalidate(&mut self.shared, uid);
    if matches!(reuse, Reuse::Stale) {
      tracing::warn!(kind = %self.kind, uid, "stale shared resource, refetching");
      self.changed = true;
    }
    reuse
  }

  // ── Writes ────────────────────────────────────────────────────────────

  /// Record `target` as the default resource.
  ///
  /// Only the default slot changes: with a concrete resource it is stored
  /// directly, with a bare id the slot is cleared so the next read resolves it.
  pub async fn set_default<P: PreferenceBackend>(
    &mut self,
    backend: &P,
    prefs: &mut PreferenceStore,
    uid: &str,
    target: DefaultTarget,
  ) -> Result<()> {
    if let DefaultTarget::Resource(resource) = &target
      && resource.kind() != self.kind
    {
      return Err(Error::KindMismatch { expected: self.kind, found: resource.kind() });
    }

    prefs
      .set(
        backend,
        uid,
        self.kind.scope(),
        self.kind.default_preference_name(),
        target.id(),
      )
      .await?;

    match target {
      DefaultTarget::Resource(resource) => {
        resource.attach_user(uid);
        self.default = Slot::Value(resource);
      }
      DefaultTarget::Id(_) => self.default.clear(),
    }
    self.changed = true;
    Ok(())
  }

  /// Create the user's default resource (its id is the user's uid) and
  /// record it as the default. A new default calendar also starts with an
  /// empty display list.
  pub async fn create_default<S>(
    &mut self,
    store: &S,
    prefs: &mut PreferenceStore,
    fields: &TemplateFields,
    template: Option<&str>,
  ) -> Result<()>
  where
    S: DirectoryBackend + PreferenceBackend,
  {
    let uid = fields.uid.as_str();
    let record = ResourceRecord::new(uid, uid, fields.render(template));

    let confirmed = store.persist(self.kind, &record).await.map_err(Error::backend)?;
    if !confirmed {
      tracing::warn!(kind = %self.kind, uid, "default resource creation rejected");
      return Err(Error::rejected(format!("default {}", self.kind)));
    }

    self.invalidate();
    self.set_default(store, prefs, uid, DefaultTarget::Id(uid.to_owned())).await?;

    if self.kind == ResourceKind::Calendar {
      prefs
        .set(store, uid, Scope::Calendar, DISPLAY_LIST_PREFERENCE, EMPTY_DISPLAY_LIST)
        .await?;
    }
    Ok(())
  }

  /// Forget owned, shared and default state.
  pub fn invalidate(&mut self) {
    self.owned.clear();
    self.shared.clear();
    self.default.clear();
    self.changed = true;
  }

  pub fn snapshot(&self) -> CollectionSnapshot {
    let records = |m: &ResourceMap| -> Vec<ResourceRecord> {
      m.values().map(|r| r.record().clone()).collect()
    };
    CollectionSnapshot {
      owned:   self.owned.map(records),
      shared:  self.shared.map(records),
      default: self.default.map(|r| r.record().clone()),
    }
  }

  pub(crate) fn take_changed(&mut self) -> bool { std::mem::take(&mut self.changed) }
}

fn slot_of(map: ResourceMap) -> Slot<ResourceMap> {
  if map.is_empty() { Slot::Empty } else { Slot::Value(map) }
}

fn revalidate(slot: &mut Slot<ResourceMap>, uid: &str) -> Reuse {
  let live = match &*slot {
    Slot::Unset => return Reuse::Unset,
    Slot::Empty => return Reuse::Live(ResourceMap::new()),
    Slot::Value(map) => map.values().all(|r| r.is_live()),
  };
  if !live {
    slot.clear();
    return Reuse::Stale;
  }

  let map = slot.value().cloned().unwrap_or_default();
  map.values().for_each(|r| r.attach_user(uid));
  Reuse::Live(map)
}

/// Serialisable view of a collection's memo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
  pub owned:   Slot<Vec<ResourceRecord>>,
  pub shared:  Slot<Vec<ResourceRecord>>,
  pub default: Slot<ResourceRecord>,
}

// ─── Name templates ──────────────────────────────────────────────────────────

/// User fields available to default-resource name templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateFields {
  pub uid:      String,
  pub fullname: String,
  pub name:     String,
  pub email:    String,
}

impl TemplateFields {
  /// Expand `%%fullname%%`, `%%name%%`, `%%email%%` and `%%uid%%`.
  ///
  /// Without a template, or when the expansion is blank, the full name is
  /// used, then the uid.
  pub fn render(&self, template: Option<&str>) -> String {
    let rendered = template
      .map(|t| {
        t.replace("%%fullname%%", &self.fullname)
          .replace("%%name%%", &self.name)
          .replace("%%email%%", &self.email)
          .replace("%%uid%%", &self.uid)
      })
      .unwrap_or_default();

    [rendered.trim(), self.fullname.trim(), self.uid.as_str()]
      .into_iter()
      .find(|s| !s.is_empty())
      .unwrap_or_default()
      .to_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::MemoryDirectory;

  fn calendars() -> ResourceCollection {
    ResourceCollection::new(
      ResourceKind::Calendar,
      FetchOptions::default(),
      FetchOptions::default(),
    )
  }

  fn seeded() -> MemoryDirectory {
    let backend = MemoryDirectory::new();
    backend.put_resource(ResourceKind::Calendar, ResourceRecord::new("alice", "alice", "Alice"));
    backend.put_resource(ResourceKind::Calendar, ResourceRecord::new("work", "alice", "Work"));
    backend.put_resource(ResourceKind::Calendar, ResourceRecord::new("bob", "bob", "Bob"));
    backend.grant(ResourceKind::Calendar, "bob", "alice");
    backend
  }

  #[tokio::test]
  async fn owned_is_fetched_when_shared_unset() {
    let backend = seeded();
    let mut cals = calendars();

    let owned = cals.get_owned(&backend, "alice").await.unwrap();

    assert_eq!(owned.keys().collect::<Vec<_>>(), ["alice", "work"]);
    assert_eq!(backend.calls().fetch_owned, 1);
    assert!(cals.shared().is_unset());
  }

  #[tokio::test]
  async fn owned_is_derived_from_shared() {
    let backend = seeded();
    let mut cals = calendars();

    let shared = cals.get_shared(&backend, "alice").await.unwrap();
    let owned = cals.get_owned(&backend, "alice").await.unwrap();

    assert_eq!(shared.len(), 3);
    assert_eq!(owned.len(), 2);
    assert_eq!(backend.calls().fetch_owned, 0);
    for (id, r) in &owned {
      assert!(Arc::ptr_eq(r, &shared[id]));
    }
  }

  #[tokio::test]
  async fn empty_owned_set_is_memoised() {
    let backend = MemoryDirectory::new();
    let mut cals = calendars();

    assert!(cals.get_owned(&backend, "nobody").await.unwrap().is_empty());
    assert!(cals.get_owned(&backend, "nobody").await.unwrap().is_empty());

    assert!(matches!(cals.owned(), Slot::Empty));
    assert_eq!(backend.calls().fetch_owned, 1);
  }

  #[tokio::test]
  async fn stale_shared_entry_resets_both_partitions() {
    let backend = seeded();
    let mut cals = calendars();

    let shared = cals.get_shared(&backend, "alice").await.unwrap();
    shared["bob"].invalidate();

    let owned = cals.get_owned(&backend, "alice").await.unwrap();

    assert_eq!(owned.len(), 2);
    assert!(cals.shared().is_unset());
    assert_eq!(backend.calls().fetch_owned, 1);
  }

  #[tokio::test]
  async fn stale_owned_entry_triggers_refetch() {
    let backend = seeded();
    let mut cals = calendars();

    let first = cals.get_owned(&backend, "alice").await.unwrap();
    first["work"].invalidate();
    let second = cals.get_owned(&backend, "alice").await.unwrap();

    assert!(second["work"].is_live());
    assert!(!Arc::ptr_eq(&first["alice"], &second["alice"]));
    assert_eq!(backend.calls().fetch_owned, 2);
  }

  #[tokio::test]
  async fn set_default_failure_keeps_state() {
    let backend = seeded();
    let mut cals = calendars();
    let mut prefs = PreferenceStore::new();
    let owned = cals.get_owned(&backend, "alice").await.unwrap();

    backend.reject_writes(true);
    let result = cals
      .set_default(&backend, &mut prefs, "alice", DefaultTarget::from(&owned["work"]))
      .await;

    assert!(result.is_err());
    assert!(cals.default_slot().is_unset());
  }

  #[tokio::test]
  async fn create_default_persists_and_records_preference() {
    let backend = MemoryDirectory::new();
    let mut cals = calendars();
    let mut prefs = PreferenceStore::new();
    let fields = TemplateFields {
      uid: "carol".into(),
      fullname: "Carol Danvers".into(),
      ..Default::default()
    };

    cals
      .create_default(&backend, &mut prefs, &fields, Some("%%fullname%% (agenda)"))
      .await
      .unwrap();

    let stored = backend.resource(ResourceKind::Calendar, "carol").unwrap();
    assert_eq!(stored.owner, "carol");
    assert_eq!(stored.name, "Carol Danvers (agenda)");
    assert_eq!(
      backend.preference("carol", Scope::Calendar, "default_calendar").as_deref(),
      Some("carol"),
    );
    assert_eq!(
      backend.preference("carol", Scope::Calendar, DISPLAY_LIST_PREFERENCE).as_deref(),
      Some("[]"),
    );
    assert!(cals.default_slot().is_unset());
  }

  #[tokio::test]
  async fn set_default_refuses_other_kind() {
    let backend = MemoryDirectory::new();
    let mut cals = calendars();
    let mut prefs = PreferenceStore::new();
    let tasks = Arc::new(Resource::bind(
      ResourceKind::Taskslist,
      ResourceRecord::new("alice", "alice", "Tasks"),
    ));

    let result = cals
      .set_default(&backend, &mut prefs, "alice", DefaultTarget::from(&tasks))
      .await;

    assert!(matches!(
      result,
      Err(Error::KindMismatch { expected: ResourceKind::Calendar, found: ResourceKind::Taskslist })
    ));
    assert!(cals.default_slot().is_unset());
    assert_eq!(backend.calls().persist_preference, 0);
  }

  #[test]
  fn template_falls_back_to_fullname_then_uid() {
    let fields = TemplateFields {
      uid: "dave".into(),
      fullname: "Dave".into(),
      name: "D".into(),
      email: "dave@example.com".into(),
    };
    assert_eq!(fields.render(Some("%%name%% <%%email%%>")), "D <dave@example.com>");
    assert_eq!(fields.render(None), "Dave");
    assert_eq!(fields.render(Some("  ")), "Dave");

    let bare = TemplateFields { uid: "eve".into(), ..Default::default() };
    assert_eq!(bare.render(Some("%%fullname%%")), "eve");
  }
}
