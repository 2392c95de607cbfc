//! [`MemoryDirectory`]: an in-process implementation of both backend traits.
//!
//! Used by tests. Every trait call is counted, so tests can assert how often
//! the aggregate actually reached the backend.
//! Server filters in [`FetchOptions`] are ignored; attribute projections are
//! honoured for user lookups.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

use crate::{
  backend::{DirectoryBackend, FetchOptions, PreferenceBackend},
  group::GroupQuery,
  identity::{UserLookup, UserRecord},
  preference::{PreferenceEntry, Scope},
  resource::{ResourceKind, ResourceRecord},
  share::{Share, ShareRight, ShareTier, SharedMailbox},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
  #[error("memory directory is unavailable")]
  Unavailable,
}

/// How many times each backend method has been called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
  pub fetch_user:         usize,
  pub fetch_default:      usize,
  pub fetch_owned:        usize,
  pub fetch_shared:       usize,
  pub fetch_share_tier:   usize,
  pub fetch_groups:       usize,
  pub persist:            usize,
  pub delete:             usize,
  pub list_preferences:   usize,
  pub persist_preference: usize,
  pub delete_preference:  usize,
}

#[derive(Debug, Clone)]
struct StoredGroup {
  record: ResourceRecord,
  list:   bool,
}

#[derive(Debug, Default)]
struct State {
  users:            BTreeMap<String, UserRecord>,
  resources:        BTreeMap<(ResourceKind, String), ResourceRecord>,
  /// `(kind, resource id, principal)`
  grants:           BTreeSet<(ResourceKind, String, String)>,
  backend_defaults: BTreeMap<(ResourceKind, String), String>,
  preferences:      BTreeMap<(String, Scope, String), PreferenceEntry>,
  groups:           BTreeMap<String, StoredGroup>,
  calls:            Calls,
  reject_writes:    bool,
  fail:             bool,
  fail_preferences: bool,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
  state: Mutex<State>,
}

impl MemoryDirectory {
  pub fn new() -> Self { Self::default() }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Count a call and fail it if the directory is switched off.
  fn enter(&self, count: impl FnOnce(&mut Calls)) -> Result<MutexGuard<'_, State>, MemoryError> {
    let mut state = self.state();
    count(&mut state.calls);
    if state.fail {
      return Err(MemoryError::Unavailable);
    }
    Ok(state)
  }

  /// Like [`Self::enter`], also failing while preferences are switched off.
  fn enter_preferences(
    &self,
    count: impl FnOnce(&mut Calls),
  ) -> Result<MutexGuard<'_, State>, MemoryError> {
    let state = self.enter(count)?;
    if state.fail_preferences {
      return Err(MemoryError::Unavailable);
    }
    Ok(state)
  }

  pub fn calls(&self) -> Calls { self.state().calls }

  /// Make every write answer `Ok(false)`.
  pub fn reject_writes(&self, reject: bool) { self.state().reject_writes = reject; }

  /// Make every call fail with [`MemoryError::Unavailable`].
  pub fn fail(&self, fail: bool) { self.state().fail = fail; }

  /// Make only the preference calls fail.
  pub fn fail_preferences(&self, fail: bool) { self.state().fail_preferences = fail; }

  // ── Seeding ───────────────────────────────────────────────────────────

  pub fn put_user(&self, record: UserRecord) {
    if let Some(uid) = record.uid.clone() {
      self.state().users.insert(uid, record);
    }
  }

  pub fn put_resource(&self, kind: ResourceKind, record: ResourceRecord) {
    self.state().resources.insert((kind, record.id.clone()), record);
  }

  /// Share resource `id` of `kind` with `principal`.
  pub fn grant(&self, kind: ResourceKind, id: &str, principal: &str) {
    self
      .state()
      .grants
      .insert((kind, id.to_owned(), principal.to_owned()));
  }

  pub fn set_backend_default(&self, kind: ResourceKind, owner: &str, id: &str) {
    self
      .state()
      .backend_defaults
      .insert((kind, owner.to_owned()), id.to_owned());
  }

  pub fn put_preference(&self, entry: PreferenceEntry) {
    let key = (entry.owner.clone(), entry.scope, entry.name.clone());
    self.state().preferences.insert(key, entry);
  }

  /// Give `principal` `right` on the mailbox of user `mailbox`. The mailbox
  /// user is created if it does not exist yet.
  pub fn share_mailbox(&self, mailbox: &str, principal: &str, right: ShareRight) {
    let mut state = self.state();
    let user = state
      .users
      .entry(mailbox.to_owned())
      .or_insert_with(|| UserRecord {
        uid: Some(mailbox.to_owned()),
        ..Default::default()
      });
    user.shares.retain(|s| s.principal != principal);
    user.shares.push(Share { principal: principal.to_owned(), right });
  }

  /// Store a group (or a distribution list when `list` is set). The record's
  /// owner manages it; `raw.members` lists its member uids.
  pub fn put_group(&self, record: ResourceRecord, list: bool) {
    self
      .state()
      .groups
      .insert(record.id.clone(), StoredGroup { record, list });
  }

  // ── Inspection ────────────────────────────────────────────────────────

  pub fn resource(&self, kind: ResourceKind, id: &str) -> Option<ResourceRecord> {
    self.state().resources.get(&(kind, id.to_owned())).cloned()
  }

  pub fn preference(&self, owner: &str, scope: Scope, name: &str) -> Option<String> {
    self
      .state()
      .preferences
      .get(&(owner.to_owned(), scope, name.to_owned()))
      .map(|e| e.value.clone())
  }
}

impl DirectoryBackend for MemoryDirectory {
  type Error = MemoryError;

  async fn fetch_user(
    &self,
    lookup: &UserLookup,
    options: &FetchOptions,
  ) -> Result<Option<UserRecord>, MemoryError> {
    let state = self.enter(|c| c.fetch_user += 1)?;
    let found = match lookup {
      UserLookup::Uid(uid) => state.users.get(uid),
      UserLookup::Email(email) => state.users.values().find(|u| u.has_email(email)),
    };
    Ok(found.map(|u| u.project(options)))
  }

  async fn fetch_default(
    &self,
    kind: ResourceKind,
    owner: &str,
  ) -> Result<Option<ResourceRecord>, MemoryError> {
    let state = self.enter(|c| c.fetch_default += 1)?;
    Ok(
      state
        .backend_defaults
        .get(&(kind, owner.to_owned()))
        .and_then(|id| state.resources.get(&(kind, id.clone())))
        .cloned(),
    )
  }

  async fn fetch_owned(
    &self,
    kind: ResourceKind,
    owner: &str,
    _options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>, MemoryError> {
    let state = self.enter(|c| c.fetch_owned += 1)?;
    Ok(
      state
        .resources
        .iter()
        .filter(|((k, _), r)| *k == kind && r.owner == owner)
        .map(|(_, r)| r.clone())
        .collect(),
    )
  }

  async fn fetch_shared(
    &self,
    kind: ResourceKind,
    owner: &str,
    _options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>, MemoryError> {
    let state = self.enter(|c| c.fetch_shared += 1)?;
    Ok(
      state
        .resources
        .iter()
        .filter(|((k, id), r)| {
          *k == kind
            && (r.owner == owner
              || state.grants.contains(&(kind, id.clone(), owner.to_owned())))
        })
        .map(|(_, r)| r.clone())
        .collect(),
    )
  }

  async fn persist(
    &self,
    kind: ResourceKind,
    record: &ResourceRecord,
  ) -> Result<bool, MemoryError> {
    let mut state = self.enter(|c| c.persist += 1)?;
    if state.reject_writes {
      return Ok(false);
    }
    state.resources.insert((kind, record.id.clone()), record.clone());
    Ok(true)
  }

  async fn delete(
    &self,
    kind: ResourceKind,
    record: &ResourceRecord,
  ) -> Result<bool, MemoryError> {
    let mut state = self.enter(|c| c.delete += 1)?;
    if state.reject_writes {
      return Ok(false);
    }
    let removed = state.resources.remove(&(kind, record.id.clone())).is_some();
    state.grants.retain(|(k, id, _)| !(*k == kind && *id == record.id));
    Ok(removed)
  }

  async fn fetch_share_tier(
    &self,
    tier: ShareTier,
    owner: &str,
    options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>, MemoryError> {
    let state = self.enter(|c| c.fetch_share_tier += 1)?;
    Ok(
      state
        .users
        .values()
        .filter(|u| {
          u.shares
            .iter()
            .any(|s| s.principal == owner && s.right.grants(tier))
        })
        .filter_map(|u| SharedMailbox::record_for(u, options))
        .collect(),
    )
  }

  async fn fetch_groups(
    &self,
    query: GroupQuery,
    owner: &str,
    _options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>, MemoryError> {
    let state = self.enter(|c| c.fetch_groups += 1)?;
    let is_member = |g: &StoredGroup| {
      g.record
        .raw
        .get("members")
        .and_then(|m| m.as_array())
        .is_some_and(|m| m.iter().any(|v| v.as_str() == Some(owner)))
    };
    Ok(
      state
        .groups
        .values()
        .filter(|g| match query {
          GroupQuery::Owned => g.record.owner == owner,
          GroupQuery::MemberOf => !g.list && is_member(g),
          GroupQuery::ListsMemberOf => g.list && is_member(g),
        })
        .map(|g| g.record.clone())
        .collect(),
    )
  }
}

impl PreferenceBackend for MemoryDirectory {
  type Error = MemoryError;

  async fn list_preferences(
    &self,
    owner: &str,
  ) -> Result<Vec<PreferenceEntry>, MemoryError> {
    let state = self.enter_preferences(|c| c.list_preferences += 1)?;
    Ok(
      state
        .preferences
        .values()
        .filter(|e| e.owner == owner)
        .cloned()
        .collect(),
    )
  }

  async fn persist_preference(
    &self,
    entry: &PreferenceEntry,
  ) -> Result<bool, MemoryError> {
    let mut state = self.enter_preferences(|c| c.persist_preference += 1)?;
    if state.reject_writes {
      return Ok(false);
    }
    let key = (entry.owner.clone(), entry.scope, entry.name.clone());
    state.preferences.insert(key, entry.clone());
    Ok(true)
  }

  async fn delete_preference(
    &self,
    entry: &PreferenceEntry,
  ) -> Result<bool, MemoryError> {
    let mut state = self.enter_preferences(|c| c.delete_preference += 1)?;
    if state.reject_writes {
      return Ok(false);
    }
    let key = (entry.owner.clone(), entry.scope, entry.name.clone());
    state.preferences.remove(&key);
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn share_tiers_follow_rights() {
    let dir = MemoryDirectory::new();
    dir.share_mailbox("team", "alice", ShareRight::Send);
    dir.share_mailbox("boss", "alice", ShareRight::Read);

    let read = dir
      .fetch_share_tier(ShareTier::Read, "alice", &FetchOptions::default())
      .await
      .unwrap();
    let send = dir
      .fetch_share_tier(ShareTier::Send, "alice", &FetchOptions::default())
      .await
      .unwrap();
    let manage = dir
      .fetch_share_tier(ShareTier::Manage, "alice", &FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(read.len(), 2);
    assert_eq!(send.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["team"]);
    assert!(manage.is_empty());
  }

  #[tokio::test]
  async fn user_lookup_projects_attributes() {
    let dir = MemoryDirectory::new();
    dir.put_user(UserRecord {
      uid: Some("alice".into()),
      fullname: Some("Alice".into()),
      email: Some("alice@example.com".into()),
      ..Default::default()
    });

    let options = FetchOptions { attributes: vec!["fullname".into()], filter: None };
    let user = dir
      .fetch_user(&UserLookup::Email("ALICE@example.com".into()), &options)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(user.uid.as_deref(), Some("alice"));
    assert_eq!(user.fullname.as_deref(), Some("Alice"));
    assert_eq!(user.email, None);
  }

  #[tokio::test]
  async fn failing_directory_still_counts_calls() {
    let dir = MemoryDirectory::new();
    dir.fail(true);
    assert!(dir.list_preferences("alice").await.is_err());
    assert_eq!(dir.calls().list_preferences, 1);
  }
}
