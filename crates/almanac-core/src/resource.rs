//! Sub-resources owned by or shared with a user: calendars, task lists and
//! address books.
//!
//! Backends hand out plain [`ResourceRecord`]s. The aggregate wraps each one in
//! a reference-counted [`Resource`], which is what collections memoise and
//! what callers hold on to between calls.

use std::{
  collections::BTreeMap,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::preference::Scope;

// ─── Kind ────────────────────────────────────────────────────────────────────

/// The resource kinds a user owns collections of.
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
pub enum ResourceKind {
  Calendar,
  Taskslist,
  Addressbook,
}

impl ResourceKind {
  /// The preference scope holding this kind's settings.
  pub fn scope(self) -> Scope {
    match self {
      Self::Calendar => Scope::Calendar,
      Self::Taskslist => Scope::Tasklist,
      Self::Addressbook => Scope::Addressbook,
    }
  }

  /// Name of the preference that records the default resource id.
  pub fn default_preference_name(self) -> &'static str {
    match self {
      Self::Calendar => "default_calendar",
      Self::Taskslist => "default_taskslist",
      Self::Addressbook => "default_addressbook",
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A resource as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
  pub id:    String,
  /// Uid of the user that created the resource. Never reassigned.
  pub owner: String,
  pub name:  String,
  /// Backend-specific attributes carried through untouched.
  #[serde(default)]
  pub raw:   serde_json::Value,
}

impl ResourceRecord {
  pub fn new(
    id: impl Into<String>,
    owner: impl Into<String>,
    name: impl Into<String>,
  ) -> Self {
    Self {
      id:    id.into(),
      owner: owner.into(),
      name:  name.into(),
      raw:   serde_json::Value::Null,
    }
  }
}

// ─── Resource ────────────────────────────────────────────────────────────────

/// A live wrapper around a [`ResourceRecord`].
///
/// A resource can be invalidated by its own mutators (for example after it
/// has been deleted). Collections that reuse a memoised resource check
/// [`Resource::is_live`] on every read and drop the whole partition when one
/// entry has gone stale.
#[derive(Debug)]
pub struct Resource {
  kind:   ResourceKind,
  record: ResourceRecord,
  user:   Mutex<Option<String>>,
  live:   AtomicBool,
}

impl Resource {
  /// Wrap `record` as a resource of `kind`.
  pub fn bind(kind: ResourceKind, record: ResourceRecord) -> Self {
    Self {
      kind,
      record,
      user: Mutex::new(None),
      live: AtomicBool::new(true),
    }
  }

  pub fn kind(&self) -> ResourceKind { self.kind }

  pub fn id(&self) -> &str { &self.record.id }

  pub fn owner(&self) -> &str { &self.record.owner }

  pub fn name(&self) -> &str { &self.record.name }

  pub fn record(&self) -> &ResourceRecord { &self.record }

  pub fn is_owned_by(&self, uid: &str) -> bool { self.record.owner == uid }

  /// Record which user is currently working with this resource.
  pub fn attach_user(&self, uid: &str) {
    let mut user = self.user.lock().unwrap_or_else(PoisonError::into_inner);
    if user.as_deref() != Some(uid) {
      *user = Some(uid.to_owned());
    }
  }

  /// The user this resource was last attached to.
  pub fn user(&self) -> Option<String> {
    self.user.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn is_live(&self) -> bool { self.live.load(Ordering::Acquire) }

  /// Mark this resource stale. Any collection still holding it will refetch.
  pub fn invalidate(&self) { self.live.store(false, Ordering::Release); }
}

/// Resources of one kind indexed by id.
pub type ResourceMap = BTreeMap<String, Arc<Resource>>;

pub(crate) fn index_records(
  kind: ResourceKind,
  uid: &str,
  records: Vec<ResourceRecord>,
) -> ResourceMap {
  records
    .into_iter()
    .map(|record| {
      let resource = Resource::bind(kind, record);
      resource.attach_user(uid);
      (resource.id().to_owned(), Arc::new(resource))
    })
    .collect()
}

// ─── Default target ──────────────────────────────────────────────────────────

/// What to record as a user's default resource: a concrete object, or just
/// its id.
#[derive(Debug, Clone)]
pub enum DefaultTarget {
  Resource(Arc<Resource>),
  Id(String),
}

impl DefaultTarget {
  pub fn id(&self) -> &str {
    match self {
      Self::Resource(r) => r.id(),
      Self::Id(id) => id,
    }
  }
}

impl From<Arc<Resource>> for DefaultTarget {
  fn from(value: Arc<Resource>) -> Self { Self::Resource(value) }
}

impl From<&Arc<Resource>> for DefaultTarget {
  fn from(value: &Arc<Resource>) -> Self { Self::Resource(Arc::clone(value)) }
}

impl From<String> for DefaultTarget {
  fn from(value: String) -> Self { Self::Id(value) }
}

impl From<&str> for DefaultTarget {
  fn from(value: &str) -> Self { Self::Id(value.to_owned()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_tags_parse_case_insensitively() {
    assert_eq!("Calendar".parse::<ResourceKind>().unwrap(), ResourceKind::Calendar);
    assert_eq!(ResourceKind::Taskslist.to_string(), "taskslist");
    assert!("mailbox".parse::<ResourceKind>().is_err());
  }

  #[test]
  fn invalidated_resource_is_not_live() {
    let r = Resource::bind(
      ResourceKind::Calendar,
      ResourceRecord::new("alice", "alice", "Alice"),
    );
    assert!(r.is_live());
    r.invalidate();
    assert!(!r.is_live());
  }

  #[test]
  fn index_attaches_user() {
    let map = index_records(
      ResourceKind::Addressbook,
      "bob",
      vec![ResourceRecord::new("ab1", "alice", "Shared")],
    );
    assert_eq!(map["ab1"].user().as_deref(), Some("bob"));
    assert!(!map["ab1"].is_owned_by("bob"));
  }
}
