//! Aggregate-level scenarios against `MemoryDirectory`.

use std::sync::Arc;

use serde_json::json;

use crate::{
  Directory, Error, Slot,
  cache::{CacheKey, CacheSync, MemoryCache},
  config::DirectoryConfig,
  group::GroupQuery,
  identity::UserRecord,
  memory::MemoryDirectory,
  preference::{PreferenceEntry, Scope},
  resource::{ResourceKind, ResourceRecord},
  share::{ShareRight, ShareTier},
};

fn alice() -> UserRecord {
  UserRecord {
    uid: Some("alice".into()),
    fullname: Some("Alice Liddell".into()),
    name: Some("Alice".into()),
    email: Some("alice@example.com".into()),
    email_list: vec!["a.liddell@example.com".into()],
    ..Default::default()
  }
}

/// alice owns `alice` and `work`; bob shares `team` with her.
fn seeded() -> Arc<MemoryDirectory> {
  let backend = MemoryDirectory::new();
  backend.put_user(alice());
  backend.put_resource(ResourceKind::Calendar, ResourceRecord::new("alice", "alice", "Alice"));
  backend.put_resource(ResourceKind::Calendar, ResourceRecord::new("work", "alice", "Work"));
  backend.put_resource(ResourceKind::Calendar, ResourceRecord::new("team", "bob", "Team"));
  backend.grant(ResourceKind::Calendar, "team", "alice");
  backend.put_resource(ResourceKind::Taskslist, ResourceRecord::new("alice", "alice", "Tasks"));
  backend.put_resource(
    ResourceKind::Addressbook,
    ResourceRecord::new("alice", "alice", "Contacts"),
  );
  Arc::new(backend)
}

fn directory(backend: &Arc<MemoryDirectory>) -> Directory<MemoryDirectory> {
  Directory::without_cache(Arc::clone(backend), DirectoryConfig::default())
}

// ─── Default resolution ──────────────────────────────────────────────────────

#[tokio::test]
async fn default_calendar_falls_back_to_owned_fetch() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  let cal = user.default_calendar().await.unwrap().unwrap();

  assert_eq!(cal.id(), "alice");
  assert_eq!(cal.owner(), "alice");
  assert_eq!(cal.user().as_deref(), Some("alice"));
  assert_eq!(backend.calls().fetch_default, 1);
  assert_eq!(backend.calls().fetch_owned, 1);
}

#[tokio::test]
async fn default_is_the_same_object_on_repeat() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  let first = user.default_calendar().await.unwrap().unwrap();
  let second = user.default_calendar().await.unwrap().unwrap();

  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(backend.calls().fetch_default, 1);
}

#[tokio::test]
async fn populated_shared_set_skips_backend_default_query() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  let shared = user.shared_resources(ResourceKind::Calendar).await.unwrap();
  let cal = user.default_calendar().await.unwrap().unwrap();

  assert!(Arc::ptr_eq(&cal, &shared["alice"]));
  assert_eq!(backend.calls().fetch_default, 0);
}

#[tokio::test]
async fn user_without_resources_has_no_default() {
  let backend = seeded();
  let mut user = directory(&backend).user("nobody");

  assert!(user.default_addressbook().await.unwrap().is_none());
  assert!(user.default_addressbook().await.unwrap().is_none());
  assert!(matches!(
    user.collection(ResourceKind::Addressbook).default_slot(),
    Slot::Empty
  ));
  assert_eq!(backend.calls().fetch_default, 1);
}

#[tokio::test]
async fn owned_is_subset_of_shared() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  let shared = user.shared_resources(ResourceKind::Calendar).await.unwrap();
  let owned = user.owned_resources(ResourceKind::Calendar).await.unwrap();

  assert!(owned.keys().all(|id| shared.contains_key(id)));
  assert_eq!(owned.len(), 2);
  assert_eq!(shared.len(), 3);
}

// ─── setDefault ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn set_default_with_object_needs_no_resolution() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let owned = user.owned_resources(ResourceKind::Calendar).await.unwrap();

  user.set_default_calendar(&owned["work"]).await.unwrap();
  let cal = user.default_calendar().await.unwrap().unwrap();

  assert!(Arc::ptr_eq(&cal, &owned["work"]));
  assert_eq!(backend.calls().fetch_default, 0);
  assert_eq!(backend.calls().fetch_shared, 0);
  assert_eq!(
    backend.preference("alice", Scope::Calendar, "default_calendar").as_deref(),
    Some("work"),
  );
}

#[tokio::test]
async fn set_default_with_id_resolves_again() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let before = user.default_calendar().await.unwrap().unwrap();
  assert_eq!(before.id(), "alice");

  user.set_default_calendar("team").await.unwrap();
  assert!(user.collection(ResourceKind::Calendar).default_slot().is_unset());
  assert!(user.collection(ResourceKind::Calendar).owned().is_set());

  let cal = user.default_calendar().await.unwrap().unwrap();
  assert_eq!(cal.id(), "team");
  assert_eq!(backend.calls().fetch_shared, 1);
}

#[tokio::test]
async fn rejected_set_default_changes_nothing() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let before = user.default_calendar().await.unwrap().unwrap();

  backend.reject_writes(true);
  let err = user.set_default_calendar("team").await.unwrap_err();
  backend.reject_writes(false);

  assert!(matches!(err, Error::Rejected { .. }));
  let after = user.default_calendar().await.unwrap().unwrap();
  assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn stored_preference_picks_the_default() {
  let backend = seeded();
  backend.put_preference(PreferenceEntry::new(
    "alice",
    Scope::Calendar,
    "default_calendar",
    "work",
  ));
  let mut user = directory(&backend).user("alice");

  let cal = user.default_calendar().await.unwrap().unwrap();

  assert_eq!(cal.id(), "work");
  assert_eq!(backend.calls().fetch_default, 0);
}

#[tokio::test]
async fn create_default_uses_user_fields() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  user
    .create_default_resource(ResourceKind::Taskslist, Some("%%fullname%% tasks"))
    .await
    .unwrap();

  let stored = backend.resource(ResourceKind::Taskslist, "alice").unwrap();
  assert_eq!(stored.name, "Alice Liddell tasks");
  let default = user.default_taskslist().await.unwrap().unwrap();
  assert_eq!(default.id(), "alice");
}

// ─── Invalidation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn calendar_mutation_leaves_other_kinds_alone() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let tasks = user.default_taskslist().await.unwrap().unwrap();
  let books = user.owned_resources(ResourceKind::Addressbook).await.unwrap();
  user.default_calendar().await.unwrap();
  let calls = backend.calls();

  let created = user.create_resource(ResourceKind::Calendar, "Holidays").await.unwrap();

  assert_eq!(created.owner(), "alice");
  assert!(user.collection(ResourceKind::Calendar).default_slot().is_unset());
  assert!(user.collection(ResourceKind::Calendar).owned().is_unset());

  let tasks_after = user.default_taskslist().await.unwrap().unwrap();
  let books_after = user.owned_resources(ResourceKind::Addressbook).await.unwrap();
  assert!(Arc::ptr_eq(&tasks, &tasks_after));
  assert!(Arc::ptr_eq(&books["alice"], &books_after["alice"]));
  assert_eq!(backend.calls().fetch_owned, calls.fetch_owned);
  assert_eq!(backend.calls().fetch_default, calls.fetch_default);
}

#[tokio::test]
async fn deleted_resource_goes_stale() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let owned = user.owned_resources(ResourceKind::Calendar).await.unwrap();

  user.delete_resource(&owned["work"]).await.unwrap();

  assert!(!owned["work"].is_live());
  let owned = user.owned_resources(ResourceKind::Calendar).await.unwrap();
  assert_eq!(owned.keys().collect::<Vec<_>>(), ["alice"]);
  assert_eq!(backend.calls().fetch_owned, 2);
}

#[tokio::test]
async fn saved_resource_is_refetched() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let owned = user.owned_resources(ResourceKind::Calendar).await.unwrap();

  let mut record = owned["work"].record().clone();
  record.name = "Office".into();
  user.save_resource(ResourceKind::Calendar, &record).await.unwrap();

  assert!(!owned["work"].is_live());
  let owned = user.owned_resources(ResourceKind::Calendar).await.unwrap();
  assert_eq!(owned["work"].name(), "Office");
}

#[tokio::test]
async fn backend_failure_leaves_slot_unset() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  backend.fail(true);
  assert!(matches!(
    user.owned_resources(ResourceKind::Calendar).await,
    Err(Error::Backend(_))
  ));
  assert!(user.collection(ResourceKind::Calendar).owned().is_unset());

  backend.fail(false);
  assert_eq!(user.owned_resources(ResourceKind::Calendar).await.unwrap().len(), 2);
}

#[tokio::test]
async fn default_resolves_when_preferences_are_unavailable() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  backend.fail_preferences(true);
  let cal = user.default_calendar().await.unwrap().unwrap();

  assert_eq!(cal.id(), "alice");
  assert_eq!(backend.calls().list_preferences, 1);
}

#[tokio::test]
async fn default_of_another_kind_is_refused() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");
  let tasks = user.default_taskslist().await.unwrap().unwrap();

  let err = user.set_default_calendar(&tasks).await.unwrap_err();

  assert!(matches!(err, Error::KindMismatch { .. }));
  assert_eq!(backend.preference("alice", Scope::Calendar, "default_calendar"), None);
}

// ─── Preferences ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn preference_round_trip() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  user.save_calendar_preference("timezone", "Europe/Paris").await.unwrap();
  assert_eq!(
    user.calendar_preference("timezone").await.unwrap().as_deref(),
    Some("Europe/Paris"),
  );

  user.delete_preference(Scope::Calendar, "timezone").await.unwrap();
  assert_eq!(user.calendar_preference("timezone").await.unwrap(), None);
  assert_eq!(backend.calls().list_preferences, 1);
}

#[tokio::test]
async fn delete_of_unsaved_preference_succeeds() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  user.delete_preference(Scope::Default, "never-set").await.unwrap();
  assert_eq!(user.default_preference("never-set").await.unwrap(), None);
}

// ─── Identity ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_load_is_memoised_partial_load_is_not() {
  let backend = seeded();
  let mut user = directory(&backend).user("alice");

  assert!(user.load(None).await.unwrap());
  assert!(user.load(None).await.unwrap());
  assert_eq!(backend.calls().fetch_user, 1);

  assert!(user.load(Some(&["fullname"][..])).await.unwrap());
  assert!(user.load(Some(&["fullname"][..])).await.unwrap());
  assert_eq!(backend.calls().fetch_user, 3);
  assert_eq!(user.fullname(), Some("Alice Liddell"));
  assert_eq!(user.record().and_then(|r| r.email.as_deref()), Some("alice@example.com"));
}

#[tokio::test]
async fn exists_is_memoised_and_set_by_load() {
  let backend = seeded();
  let dir = directory(&backend);

  let mut ghost = dir.user("ghost");
  assert!(!ghost.exists().await.unwrap());
  assert!(!ghost.exists().await.unwrap());
  assert_eq!(backend.calls().fetch_user, 1);

  let mut user = dir.user("alice");
  user.load(None).await.unwrap();
  assert!(user.exists().await.unwrap());
  assert_eq!(backend.calls().fetch_user, 2);
}

#[tokio::test]
async fn uid_and_email_must_match() {
  let backend = seeded();
  let dir = directory(&backend);

  let mut alias = dir.user_on(None, Some("alice"), Some("a.liddell@example.com"));
  assert!(alias.load(None).await.unwrap());

  let mut mismatch = dir.user_on(None, Some("alice"), Some("bob@example.com"));
  assert!(!mismatch.load(None).await.unwrap());
  assert!(!mismatch.exists().await.unwrap());
}

#[tokio::test]
async fn email_only_user_resolves_uid() {
  let backend = seeded();
  let mut user = directory(&backend).user_by_email("alice@example.com");

  let cal = user.default_calendar().await.unwrap().unwrap();

  assert_eq!(user.uid(), Some("alice"));
  assert_eq!(cal.id(), "alice");
}

#[tokio::test]
async fn no_identity_is_an_error() {
  let backend = seeded();
  let mut user = directory(&backend).user_on(None, None, None);
  assert!(matches!(user.exists().await, Err(Error::UnresolvedIdentity)));
  assert!(matches!(
    user.owned_resources(ResourceKind::Calendar).await,
    Err(Error::UnresolvedIdentity)
  ));
}

#[tokio::test]
async fn object_share_identity_is_split() {
  let backend = seeded();
  let dir = directory(&backend);

  let user = dir.user("alice.-.team");
  let share = user.object_share().unwrap();
  assert_eq!(share.user, "alice");
  assert_eq!(share.mailbox, "team");
  assert!(!dir.user("alice").is_object_share());
}

#[tokio::test]
async fn object_share_is_read_from_email() {
  let backend = seeded();
  let dir = directory(&backend);

  let user = dir.user_by_email("alice.-.team@example.com");
  assert!(user.is_object_share());
  let share = user.object_share().unwrap();
  assert_eq!(share.user, "alice");
  assert_eq!(share.mailbox, "team@example.com");

  assert!(!dir.user_by_email("alice@example.com").is_object_share());
}

// ─── Shares and groups ───────────────────────────────────────────────────────

#[tokio::test]
async fn share_tiers_are_memoised_independently() {
  let backend = seeded();
  backend.put_user(UserRecord {
    uid: Some("sales".into()),
    fullname: Some("Sales Team".into()),
    email: Some("sales@example.com".into()),
    ..Default::default()
  });
  backend.share_mailbox("sales", "alice", ShareRight::Send);
  backend.share_mailbox("archive", "alice", ShareRight::Read);
  let mut user = directory(&backend).user("alice");

  let read = user.shared_mailboxes(ShareTier::Read).await.unwrap();
  let read_again = user.shared_mailboxes(ShareTier::Read).await.unwrap();
  assert_eq!(read.len(), 2);
  assert!(Arc::ptr_eq(&read["sales"], &read_again["sales"]));
  assert_eq!(backend.calls().fetch_share_tier, 1);

  let send = user.shared_users(ShareTier::Send).await.unwrap();
  assert_eq!(send.len(), 1);
  assert_eq!(send[0].uid(), Some("sales"));
  assert_eq!(send[0].fullname(), Some("Sales Team"));
  assert_eq!(backend.calls().fetch_share_tier, 2);

  assert!(user.shared_mailboxes(ShareTier::Manage).await.unwrap().is_empty());
  assert!(user.shared_mailboxes(ShareTier::Manage).await.unwrap().is_empty());
  assert_eq!(backend.calls().fetch_share_tier, 3);
}

#[tokio::test]
async fn shared_users_load_full_record_once() {
  let backend = seeded();
  backend.put_user(UserRecord {
    uid: Some("sales".into()),
    fullname: Some("Sales Team".into()),
    email: Some("sales@example.com".into()),
    ..Default::default()
  });
  backend.share_mailbox("sales", "alice", ShareRight::Admin);
  let mut user = directory(&backend).user("alice");

  let mut managed = user.shared_users(ShareTier::Manage).await.unwrap();
  let sales = &mut managed[0];
  assert_eq!(sales.fullname(), Some("Sales Team"));
  assert!(sales.exists().await.unwrap());
  assert_eq!(backend.calls().fetch_user, 0);

  assert!(sales.load(None).await.unwrap());
  assert!(sales.load(None).await.unwrap());
  assert_eq!(backend.calls().fetch_user, 1);
  assert_eq!(sales.record().unwrap().email.as_deref(), Some("sales@example.com"));
}

#[tokio::test]
async fn group_queries_have_separate_slots() {
  let backend = seeded();
  let mut staff = ResourceRecord::new("cn=staff", "admin", "Staff");
  staff.raw = json!({ "members": ["alice", "bob"] });
  let mut news = ResourceRecord::new("cn=news", "alice", "Newsletter");
  news.raw = json!({ "email": "news@example.com", "members": ["alice"] });
  backend.put_group(staff, false);
  backend.put_group(news, true);
  let mut user = directory(&backend).user("alice");

  let member_of = user.groups(GroupQuery::MemberOf).await.unwrap();
  let lists = user.groups(GroupQuery::ListsMemberOf).await.unwrap();
  let owned = user.groups(GroupQuery::Owned).await.unwrap();

  assert_eq!(member_of.keys().collect::<Vec<_>>(), ["cn=staff"]);
  assert_eq!(lists["cn=news"].email(), Some("news@example.com"));
  assert_eq!(owned.keys().collect::<Vec<_>>(), ["cn=news"]);
  assert_eq!(backend.calls().fetch_groups, 3);

  user.groups(GroupQuery::MemberOf).await.unwrap();
  assert_eq!(backend.calls().fetch_groups, 3);
}

// ─── Cache mirror ────────────────────────────────────────────────────────────

#[tokio::test]
async fn state_changes_are_mirrored_to_cache() {
  let backend = seeded();
  let cache = Arc::new(MemoryCache::new(16, None));
  let dir = Directory::new(
    Arc::clone(&backend),
    DirectoryConfig::default(),
    CacheSync::new(Arc::clone(&cache)),
  );
  let mut user = dir.user("alice");

  user.default_calendar().await.unwrap();

  let snapshot = cache.snapshot(&CacheKey::user("default", "alice")).await.unwrap();
  let calendars = &snapshot.resources[&ResourceKind::Calendar];
  assert!(matches!(&calendars.default, Slot::Value(r) if r.id == "alice"));
  assert!(calendars.owned.is_set());
  assert!(snapshot.resources[&ResourceKind::Taskslist].owned.is_unset());
}

#[tokio::test]
async fn cache_is_untouched_without_changes() {
  let backend = seeded();
  let cache = Arc::new(MemoryCache::new(16, None));
  let dir = Directory::new(
    Arc::clone(&backend),
    DirectoryConfig::default(),
    CacheSync::new(Arc::clone(&cache)),
  );
  let mut user = dir.user("alice");
  let key = CacheKey::user("default", "alice");

  user.owned_resources(ResourceKind::Calendar).await.unwrap();
  let first = cache.snapshot(&key).await.unwrap();
  user.owned_resources(ResourceKind::Calendar).await.unwrap();
  let second = cache.snapshot(&key).await.unwrap();

  assert_eq!(first.synced_at, second.synced_at);
}
