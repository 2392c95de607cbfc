//! Collaborator traits for the directory and preference backends.
//!
//! The engine in this crate never talks to LDAP or SQL itself. Storage
//! backends (e.g. `almanac-store-sqlite`, or [`crate::memory::MemoryDirectory`]
//! in tests) implement these traits; the aggregate depends only on them.

use std::future::Future;

use crate::{
  group::GroupQuery,
  identity::{UserLookup, UserRecord},
  preference::PreferenceEntry,
  resource::{ResourceKind, ResourceRecord},
  share::ShareTier,
};

// ─── Query options ───────────────────────────────────────────────────────────

/// Attribute projection and optional server-specific filter for one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
  /// Attributes to fetch. Empty means "whatever the backend returns by
  /// default".
  pub attributes: Vec<String>,
  /// Opaque backend filter overriding the backend's built-in one.
  pub filter:     Option<String>,
}

impl FetchOptions {
  pub fn new(attributes: &[String], filter: Option<&String>) -> Self {
    Self {
      attributes: attributes.to_vec(),
      filter:     filter.cloned(),
    }
  }

  /// `true` if `attribute` was requested, or nothing was requested at all.
  pub fn wants(&self, attribute: &str) -> bool {
    self.attributes.is_empty() || self.attributes.iter().any(|a| a == attribute)
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// The directory side: users, their resources, mailbox shares and groups.
///
/// Write methods return `Ok(false)` when the backend answered but refused the
/// write; `Err` is reserved for calls that could not complete.
pub trait DirectoryBackend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Look a user up by uid or email. Returns `None` if there is no match.
  fn fetch_user<'a>(
    &'a self,
    lookup: &'a UserLookup,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Option<UserRecord>, Self::Error>> + Send + 'a;

  // ── Resources ─────────────────────────────────────────────────────────

  /// The resource the backend designates as `owner`'s default of `kind`.
  fn fetch_default<'a>(
    &'a self,
    kind: ResourceKind,
    owner: &'a str,
  ) -> impl Future<Output = Result<Option<ResourceRecord>, Self::Error>> + Send + 'a;

  /// Resources of `kind` whose owner is `owner`.
  fn fetch_owned<'a>(
    &'a self,
    kind: ResourceKind,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, Self::Error>> + Send + 'a;

  /// Every resource of `kind` that `owner` can access: its own plus those
  /// shared with it.
  fn fetch_shared<'a>(
    &'a self,
    kind: ResourceKind,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, Self::Error>> + Send + 'a;

  /// Insert or update a resource.
  fn persist<'a>(
    &'a self,
    kind: ResourceKind,
    record: &'a ResourceRecord,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Remove a resource.
  fn delete<'a>(
    &'a self,
    kind: ResourceKind,
    record: &'a ResourceRecord,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Shares and groups ─────────────────────────────────────────────────

  /// Mailboxes shared with `owner` at `tier` or above.
  fn fetch_share_tier<'a>(
    &'a self,
    tier: ShareTier,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, Self::Error>> + Send + 'a;

  /// Groups or lists related to `owner` as described by `query`.
  fn fetch_groups<'a>(
    &'a self,
    query: GroupQuery,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, Self::Error>> + Send + 'a;
}

// ─── Preferences ─────────────────────────────────────────────────────────────

/// Per-user key/value preference persistence.
pub trait PreferenceBackend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Every preference belonging to `owner`, in one call.
  fn list_preferences<'a>(
    &'a self,
    owner: &'a str,
  ) -> impl Future<Output = Result<Vec<PreferenceEntry>, Self::Error>> + Send + 'a;

  /// Insert or update `entry`.
  fn persist_preference<'a>(
    &'a self,
    entry: &'a PreferenceEntry,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Remove `entry`. Deleting an entry that was never stored is not an error.
  fn delete_preference<'a>(
    &'a self,
    entry: &'a PreferenceEntry,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;
}
