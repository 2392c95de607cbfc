//! The [`User`] aggregate and the [`Directory`] handle that builds it.
//!
//! A `User` owns every memo described in this crate: identity, preferences,
//! one [`ResourceCollection`] per resource kind, the share tiers and the group
//! queries. Each public method that can change a memo ends with a single
//! post-commit step that mirrors the memo to the external cache if anything
//! changed.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error, Result,
  backend::{DirectoryBackend, FetchOptions, PreferenceBackend},
  cache::{CacheKey, CacheSnapshot, CacheSync, ExternalCache, NoCache},
  collection::{ResourceCollection, TemplateFields},
  config::DirectoryConfig,
  group::{Group, GroupIndex, GroupQuery},
  identity::{ObjectShare, UserLookup, UserRecord},
  index::ObjectMap,
  preference::{PreferenceStore, Scope},
  resource::{DefaultTarget, Resource, ResourceKind, ResourceMap, ResourceRecord},
  share::{ShareIndex, ShareTier, SharedMailbox},
  slot::Slot,
};

// ─── Directory handle ────────────────────────────────────────────────────────

/// Shared entry point: a backend, its configuration and the cache mirror.
/// Cheap to clone.
#[derive(Debug)]
pub struct Directory<S, C = NoCache> {
  store:  Arc<S>,
  config: Arc<DirectoryConfig>,
  cache:  Arc<CacheSync<C>>,
}

impl<S, C> Clone for Directory<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:  Arc::clone(&self.store),
      config: Arc::clone(&self.config),
      cache:  Arc::clone(&self.cache),
    }
  }
}

impl<S> Directory<S, NoCache>
where
  S: DirectoryBackend + PreferenceBackend,
{
  pub fn without_cache(store: Arc<S>, config: DirectoryConfig) -> Self {
    Self::new(store, config, CacheSync::disabled(NoCache))
  }
}

impl<S, C> Directory<S, C>
where
  S: DirectoryBackend + PreferenceBackend,
  C: ExternalCache,
{
  pub fn new(store: Arc<S>, config: DirectoryConfig, cache: CacheSync<C>) -> Self {
    Self { store, config: Arc::new(config), cache: Arc::new(cache) }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &DirectoryConfig { &self.config }

  /// A user on the default server, identified by uid.
  pub fn user(&self, uid: &str) -> User<S, C> {
    self.user_on(None, Some(uid), None)
  }

  /// A user on the default server, identified by email.
  pub fn user_by_email(&self, email: &str) -> User<S, C> {
    self.user_on(None, None, Some(email))
  }

  /// A user on `server` (the default server if `None`). When both `uid` and
  /// `email` are given they must designate the same directory entry.
  pub fn user_on(
    &self,
    server: Option<&str>,
    uid: Option<&str>,
    email: Option<&str>,
  ) -> User<S, C> {
    let server = server.unwrap_or(&self.config.default_server).to_owned();
    User::new(self.clone(), server, uid.map(str::to_owned), email.map(str::to_owned))
  }
}

// ─── Aggregate ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct User<S, C = NoCache> {
  dir:              Directory<S, C>,
  server:           String,
  uid:              Option<String>,
  email:            Option<String>,
  record:           Option<UserRecord>,
  loaded:           Option<bool>,
  exists:           Option<bool>,
  identity_changed: bool,
  preferences:      PreferenceStore,
  calendars:        ResourceCollection,
  taskslists:       ResourceCollection,
  addressbooks:     ResourceCollection,
  shares:           ShareIndex,
  groups:           GroupIndex,
}

impl<S, C> User<S, C>
where
  S: DirectoryBackend + PreferenceBackend,
  C: ExternalCache,
{
  fn new(
    dir: Directory<S, C>,
    server: String,
    uid: Option<String>,
    email: Option<String>,
  ) -> Self {
    let collection = |kind| {
      let (owned, shared) = dir.config.resource_options(&server, kind);
      ResourceCollection::new(kind, owned, shared)
    };
    let calendars = collection(ResourceKind::Calendar);
    let taskslists = collection(ResourceKind::Taskslist);
    let addressbooks = collection(ResourceKind::Addressbook);

    Self {
      dir,
      server,
      uid,
      email,
      record: None,
      loaded: None,
      exists: None,
      identity_changed: false,
      preferences: PreferenceStore::new(),
      calendars,
      taskslists,
      addressbooks,
      shares: ShareIndex::new(),
      groups: GroupIndex::new(),
    }
  }

  /// A user already known from a share tier record. The record only holds
  /// the share projection, so a default load still reaches the backend.
  fn hydrated(dir: Directory<S, C>, server: String, record: UserRecord) -> Self {
    let mut user = Self::new(dir, server, record.uid.clone(), record.email.clone());
    user.record = Some(record);
    user.exists = Some(true);
    user
  }

  // ── Identity ──────────────────────────────────────────────────────────

  pub fn uid(&self) -> Option<&str> { self.uid.as_deref() }

  pub fn email(&self) -> Option<&str> { self.email.as_deref() }

  pub fn server(&self) -> &str { &self.server }

  /// The directory attributes held so far.
  pub fn record(&self) -> Option<&UserRecord> { self.record.as_ref() }

  pub fn fullname(&self) -> Option<&str> {
    self.record.as_ref().and_then(|r| r.fullname.as_deref())
  }

  /// Fetch the user's directory entry.
  ///
  /// A default-attribute load (`attributes == None`) is memoised; an explicit
  /// attribute subset always reaches the backend and merges into the held
  /// record. Returns whether the user was found.
  pub async fn load(&mut self, attributes: Option<&[&str]>) -> Result<bool> {
    tracing::debug!(uid = ?self.uid, server = %self.server, "load user");
    if attributes.is_none()
      && let Some(loaded) = self.loaded
    {
      tracing::trace!(uid = ?self.uid, "user load hit");
      return Ok(loaded);
    }

    let by_email = self.uid.is_none();
    let mut options = self.dir.config.load_options(&self.server, by_email);
    if let Some(attributes) = attributes {
      options.attributes = attributes.iter().map(|a| (*a).to_owned()).collect();
    }

    let found = match self.fetch_identity(&options).await? {
      Some(record) => {
        if self.uid.is_none() {
          self.uid = record.uid.clone();
        }
        if self.email.is_none() {
          self.email = record.email.clone();
        }
        self.record.get_or_insert_with(UserRecord::default).merge(record);
        true
      }
      None => false,
    };

    if attributes.is_none() {
      self.loaded = Some(found);
      self.exists = Some(found);
    }
    self.identity_changed = true;
    self.commit().await;
    Ok(found)
  }

  /// Whether the user has a directory entry. Memoised.
  pub async fn exists(&mut self) -> Result<bool> {
    tracing::debug!(uid = ?self.uid, server = %self.server, "check user exists");
    if let Some(exists) = self.exists {
      return Ok(exists);
    }

    let mut options = self.dir.config.load_options(&self.server, self.uid.is_none());
    options.attributes = vec!["uid".to_owned(), "email".to_owned(), "email_list".to_owned()];
    let found = self.fetch_identity(&options).await?.is_some();

    self.exists = Some(found);
    self.identity_changed = true;
    self.commit().await;
    Ok(found)
  }

  /// Look the user up and apply the uid/email consistency check.
  async fn fetch_identity(&self, options: &FetchOptions) -> Result<Option<UserRecord>> {
    let lookup = match (&self.uid, &self.email) {
      (Some(uid), _) => UserLookup::Uid(uid.clone()),
      (None, Some(email)) => UserLookup::Email(email.clone()),
      (None, None) => return Err(Error::UnresolvedIdentity),
    };

    let record = self
      .dir
      .store
      .fetch_user(&lookup, options)
      .await
      .map_err(Error::backend)?;

    let Some(record) = record else {
      return Ok(None);
    };
    if let (UserLookup::Uid(uid), Some(email)) = (&lookup, &self.email) {
      let carries_email = record.email.is_some() || !record.email_list.is_empty();
      if carries_email && !record.has_email(email) {
        tracing::warn!(uid = %uid, email = %email, "uid and email designate different users");
        return Ok(None);
      }
    }
    Ok(Some(record))
  }

  /// The uid, loading the user by email first if that is all we have.
  async fn require_uid(&mut self) -> Result<String> {
    if let Some(uid) = &self.uid {
      return Ok(uid.clone());
    }
    if self.email.is_some() {
      self.load(None).await?;
    }
    self.uid.clone().ok_or(Error::UnresolvedIdentity)
  }

  /// Whether this identity is `<user><delimiter><mailbox>`.
  pub fn is_object_share(&self) -> bool { self.object_share().is_some() }

  /// The object share named by the uid, or failing that by the email.
  pub fn object_share(&self) -> Option<ObjectShare> {
    let delimiter = &self.dir.config.object_share_delimiter;
    [self.uid.as_deref(), self.email.as_deref()]
      .into_iter()
      .flatten()
      .find_map(|identity| ObjectShare::parse(identity, delimiter))
  }

  // ── Preferences ───────────────────────────────────────────────────────

  pub async fn preference(&mut self, scope: Scope, name: &str) -> Result<Option<String>> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %scope, name, "get preference");
    let result = self.preferences.get(&*self.dir.store, &uid, scope, name).await;
    self.commit().await;
    result
  }

  pub async fn save_preference(&mut self, scope: Scope, name: &str, value: &str) -> Result<()> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %scope, name, "save preference");
    let result = self
      .preferences
      .set(&*self.dir.store, &uid, scope, name, value)
      .await;
    self.commit().await;
    result
  }

  pub async fn delete_preference(&mut self, scope: Scope, name: &str) -> Result<()> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %scope, name, "delete preference");
    let result = self.preferences.delete(&*self.dir.store, &uid, scope, name).await;
    self.commit().await;
    result
  }

  pub async fn default_preference(&mut self, name: &str) -> Result<Option<String>> {
    self.preference(Scope::Default, name).await
  }

  pub async fn calendar_preference(&mut self, name: &str) -> Result<Option<String>> {
    self.preference(Scope::Calendar, name).await
  }

  pub async fn taskslist_preference(&mut self, name: &str) -> Result<Option<String>> {
    self.preference(Scope::Tasklist, name).await
  }

  pub async fn addressbook_preference(&mut self, name: &str) -> Result<Option<String>> {
    self.preference(Scope::Addressbook, name).await
  }

  pub async fn save_default_preference(&mut self, name: &str, value: &str) -> Result<()> {
    self.save_preference(Scope::Default, name, value).await
  }

  pub async fn save_calendar_preference(&mut self, name: &str, value: &str) -> Result<()> {
    self.save_preference(Scope::Calendar, name, value).await
  }

  pub async fn save_taskslist_preference(&mut self, name: &str, value: &str) -> Result<()> {
    self.save_preference(Scope::Tasklist, name, value).await
  }

  pub async fn save_addressbook_preference(
    &mut self,
    name: &str,
    value: &str,
  ) -> Result<()> {
    self.save_preference(Scope::Addressbook, name, value).await
  }

  // ── Resources ─────────────────────────────────────────────────────────

  pub fn collection(&self, kind: ResourceKind) -> &ResourceCollection {
    match kind {
      ResourceKind::Calendar => &self.calendars,
      ResourceKind::Taskslist => &self.taskslists,
      ResourceKind::Addressbook => &self.addressbooks,
    }
  }

  fn collection_mut(&mut self, kind: ResourceKind) -> &mut ResourceCollection {
    match kind {
      ResourceKind::Calendar => &mut self.calendars,
      ResourceKind::Taskslist => &mut self.taskslists,
      ResourceKind::Addressbook => &mut self.addressbooks,
    }
  }

  /// Borrow the backend, the preference store and one collection at once.
  fn parts(
    &mut self,
    kind: ResourceKind,
  ) -> (&S, &mut PreferenceStore, &mut ResourceCollection) {
    let collection = match kind {
      ResourceKind::Calendar => &mut self.calendars,
      ResourceKind::Taskslist => &mut self.taskslists,
      ResourceKind::Addressbook => &mut self.addressbooks,
    };
    (&*self.dir.store, &mut self.preferences, collection)
  }

  pub async fn owned_resources(&mut self, kind: ResourceKind) -> Result<ResourceMap> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %kind, "owned resources");
    let (store, _, collection) = self.parts(kind);
    let result = collection.get_owned(store, &uid).await;
    self.commit().await;
    result
  }

  pub async fn shared_resources(&mut self, kind: ResourceKind) -> Result<ResourceMap> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %kind, "shared resources");
    let (store, _, collection) = self.parts(kind);
    let result = collection.get_shared(store, &uid).await;
    self.commit().await;
    result
  }

  /// The default resource of `kind`, or `None` if the user has none.
  pub async fn default_resource(
    &mut self,
    kind: ResourceKind,
  ) -> Result<Option<Arc<Resource>>> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %kind, "default resource");
    let result = self.resolve_default(kind, &uid).await;
    self.commit().await;
    result
  }

  async fn resolve_default(
    &mut self,
    kind: ResourceKind,
    uid: &str,
  ) -> Result<Option<Arc<Resource>>> {
    let (store, prefs, collection) = self.parts(kind);
    let needs_resolution = match collection.default_slot() {
      Slot::Value(resource) => !resource.is_live(),
      Slot::Empty => false,
      Slot::Unset => true,
    };
    let preferred = if needs_resolution {
      match prefs
        .get(store, uid, kind.scope(), kind.default_preference_name())
        .await
      {
        Ok(preferred) => preferred,
        Err(err) => {
          tracing::warn!(uid, %kind, error = %err, "default preference unavailable");
          None
        }
      }
    } else {
      None
    };
    collection.get_default(store, uid, preferred.as_deref()).await
  }

  /// Record `target` as the default resource of `kind`. Owned and shared
  /// listings are left alone.
  pub async fn set_default_resource(
    &mut self,
    kind: ResourceKind,
    target: impl Into<DefaultTarget>,
  ) -> Result<()> {
    let uid = self.require_uid().await?;
    let target = target.into();
    tracing::debug!(uid = %uid, %kind, id = target.id(), "set default resource");
    let (store, prefs, collection) = self.parts(kind);
    let result = collection.set_default(store, prefs, &uid, target).await;
    self.commit().await;
    result
  }

  /// Create the user's default resource of `kind`, named from `template`.
  pub async fn create_default_resource(
    &mut self,
    kind: ResourceKind,
    template: Option<&str>,
  ) -> Result<()> {
    let uid = self.require_uid().await?;
    if self.record.is_none() {
      self.load(None).await?;
    }
    let fields = self.template_fields(&uid);
    tracing::debug!(uid = %uid, %kind, "create default resource");
    let (store, prefs, collection) = self.parts(kind);
    let result = collection.create_default(store, prefs, &fields, template).await;
    self.commit().await;
    result
  }

  fn template_fields(&self, uid: &str) -> TemplateFields {
    let record = self.record.clone().unwrap_or_default();
    TemplateFields {
      uid:      uid.to_owned(),
      fullname: record.fullname.unwrap_or_default(),
      name:     record.name.unwrap_or_default(),
      email:    record.email.or_else(|| self.email.clone()).unwrap_or_default(),
    }
  }

  /// Create a new resource of `kind` owned by this user.
  pub async fn create_resource(
    &mut self,
    kind: ResourceKind,
    name: &str,
  ) -> Result<Arc<Resource>> {
    let uid = self.require_uid().await?;
    let record = ResourceRecord::new(Uuid::new_v4().to_string(), uid.clone(), name);
    tracing::debug!(uid = %uid, %kind, id = %record.id, "create resource");

    let confirmed = self
      .dir
      .store
      .persist(kind, &record)
      .await
      .map_err(Error::backend)?;
    if !confirmed {
      tracing::warn!(uid = %uid, %kind, id = %record.id, "resource creation rejected");
      return Err(Error::rejected(format!("{kind} {}", record.id)));
    }

    let resource = Arc::new(Resource::bind(kind, record));
    resource.attach_user(&uid);
    self.collection_mut(kind).invalidate();
    self.commit().await;
    Ok(resource)
  }

  /// Persist changes to an existing resource. Memoised copies of it are
  /// marked stale.
  pub async fn save_resource(
    &mut self,
    kind: ResourceKind,
    record: &ResourceRecord,
  ) -> Result<()> {
    tracing::debug!(uid = ?self.uid, %kind, id = %record.id, "save resource");
    let confirmed = self
      .dir
      .store
      .persist(kind, record)
      .await
      .map_err(Error::backend)?;
    if !confirmed {
      tracing::warn!(%kind, id = %record.id, "resource save rejected");
      return Err(Error::rejected(format!("{kind} {}", record.id)));
    }

    self.retire(kind, &record.id);
    self.commit().await;
    Ok(())
  }

  /// Delete `resource` from the backend and mark it stale.
  pub async fn delete_resource(&mut self, resource: &Arc<Resource>) -> Result<()> {
    let kind = resource.kind();
    tracing::debug!(uid = ?self.uid, %kind, id = resource.id(), "delete resource");
    let confirmed = self
      .dir
      .store
      .delete(kind, resource.record())
      .await
      .map_err(Error::backend)?;
    if !confirmed {
      tracing::warn!(%kind, id = resource.id(), "resource deletion rejected");
      return Err(Error::rejected(format!("{kind} {} deletion", resource.id())));
    }

    resource.invalidate();
    self.retire(kind, resource.id());
    self.commit().await;
    Ok(())
  }

  /// Invalidate every memoised object with `id` and then the whole collection.
  fn retire(&mut self, kind: ResourceKind, id: &str) {
    let collection = self.collection_mut(kind);
    for partition in [collection.owned(), collection.shared()] {
      if let Some(resource) = partition.value().and_then(|m| m.get(id)) {
        resource.invalidate();
      }
    }
    if let Slot::Value(resource) = collection.default_slot()
      && resource.id() == id
    {
      resource.invalidate();
    }
    collection.invalidate();
  }

  /// Signal that resources of `kind` changed outside this aggregate.
  pub async fn resources_changed(&mut self, kind: ResourceKind) {
    tracing::debug!(uid = ?self.uid, %kind, "resources changed");
    self.collection_mut(kind).invalidate();
    self.commit().await;
  }

  pub async fn default_calendar(&mut self) -> Result<Option<Arc<Resource>>> {
    self.default_resource(ResourceKind::Calendar).await
  }

  pub async fn default_taskslist(&mut self) -> Result<Option<Arc<Resource>>> {
    self.default_resource(ResourceKind::Taskslist).await
  }

  pub async fn default_addressbook(&mut self) -> Result<Option<Arc<Resource>>> {
    self.default_resource(ResourceKind::Addressbook).await
  }

  pub async fn set_default_calendar(&mut self, target: impl Into<DefaultTarget>) -> Result<()> {
    self.set_default_resource(ResourceKind::Calendar, target).await
  }

  pub async fn set_default_taskslist(&mut self, target: impl Into<DefaultTarget>) -> Result<()> {
    self.set_default_resource(ResourceKind::Taskslist, target).await
  }

  pub async fn set_default_addressbook(
    &mut self,
    target: impl Into<DefaultTarget>,
  ) -> Result<()> {
    self.set_default_resource(ResourceKind::Addressbook, target).await
  }

  // ── Shares and groups ─────────────────────────────────────────────────

  /// Mailboxes shared with this user at `tier`.
  pub async fn shared_mailboxes(
    &mut self,
    tier: ShareTier,
  ) -> Result<ObjectMap<SharedMailbox>> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %tier, "shared mailboxes");
    let options = self.dir.config.share_options(&self.server, tier);
    let result = self.shares.get(&*self.dir.store, &uid, tier, &options).await;
    self.commit().await;
    result
  }

  /// The mailboxes shared at `tier`, each as a loaded user.
  pub async fn shared_users(&mut self, tier: ShareTier) -> Result<Vec<User<S, C>>> {
    let mailboxes = self.shared_mailboxes(tier).await?;
    mailboxes
      .values()
      .map(|mailbox| {
        let record = mailbox.user_record()?;
        Ok(Self::hydrated(self.dir.clone(), self.server.clone(), record))
      })
      .collect()
  }

  pub async fn groups(&mut self, query: GroupQuery) -> Result<ObjectMap<Group>> {
    let uid = self.require_uid().await?;
    tracing::debug!(uid = %uid, %query, "groups");
    let options = self.dir.config.group_options(&self.server, query);
    let result = self.groups.get(&*self.dir.store, &uid, query, &options).await;
    self.commit().await;
    result
  }

  pub async fn invalidate_shares(&mut self) {
    self.shares.invalidate_all();
    self.commit().await;
  }

  pub async fn invalidate_groups(&mut self) {
    self.groups.invalidate_all();
    self.commit().await;
  }

  /// Drop every memo except the identity itself.
  pub async fn invalidate(&mut self) {
    self.record = None;
    self.loaded = None;
    self.exists = None;
    self.identity_changed = true;
    self.preferences.invalidate();
    self.calendars.invalidate();
    self.taskslists.invalidate();
    self.addressbooks.invalidate();
    self.shares.invalidate_all();
    self.groups.invalidate_all();
    self.commit().await;
  }

  // ── Cache mirror ──────────────────────────────────────────────────────

  pub fn snapshot(&self) -> CacheSnapshot {
    CacheSnapshot {
      uid:         self.uid.clone(),
      email:       self.email.clone(),
      server:      self.server.clone(),
      is_loaded:   self.loaded,
      exists:      self.exists,
      record:      self.record.clone(),
      preferences: self.preferences.snapshot(),
      resources:   [&self.calendars, &self.taskslists, &self.addressbooks]
        .into_iter()
        .map(|c| (c.kind(), c.snapshot()))
        .collect(),
      shares:      self.shares.snapshot(),
      groups:      self.groups.snapshot(),
      synced_at:   Utc::now(),
    }
  }

  /// Mirror the memo to the external cache if any component changed.
  async fn commit(&mut self) {
    let mut changed = std::mem::take(&mut self.identity_changed);
    changed |= self.preferences.take_changed();
    changed |= self.calendars.take_changed();
    changed |= self.taskslists.take_changed();
    changed |= self.addressbooks.take_changed();
    changed |= self.shares.take_changed();
    changed |= self.groups.take_changed();

    if !changed || !self.dir.cache.is_enabled() {
      return;
    }
    let Some(uid) = self.uid.as_deref() else {
      return;
    };
    let key = CacheKey::user(&self.server, uid);
    self.dir.cache.sync(&key, &self.snapshot()).await;
  }
}
