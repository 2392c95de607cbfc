//! Directory configuration, passed explicitly to every aggregate.
//!
//! Every field has a default, so an empty TOML table deserialises into a
//! working configuration.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
  backend::FetchOptions, group::GroupQuery, resource::ResourceKind, share::ShareTier,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
  /// Server used when an aggregate is built without naming one.
  pub default_server:         String,
  /// Per-server filter overrides, keyed by server name.
  pub servers:                BTreeMap<String, ServerFilters>,
  pub attributes:             AttributeSets,
  /// Separator between the user and mailbox halves of an object-share uid.
  pub object_share_delimiter: String,
  pub cache:                  CacheSettings,
}

impl Default for DirectoryConfig {
  fn default() -> Self {
    Self {
      default_server:         "default".to_owned(),
      servers:                BTreeMap::new(),
      attributes:             AttributeSets::default(),
      object_share_delimiter: ".-.".to_owned(),
      cache:                  CacheSettings::default(),
    }
  }
}

impl DirectoryConfig {
  /// Filter overrides for `server`. An unknown server has none.
  pub fn filters(&self, server: &str) -> ServerFilters {
    self.servers.get(server).cloned().unwrap_or_default()
  }

  pub fn load_options(&self, server: &str, by_email: bool) -> FetchOptions {
    let filters = self.filters(server);
    let filter = if by_email {
      filters.user_infos_from_email
    } else {
      filters.user_infos
    };
    FetchOptions { attributes: self.attributes.load.clone(), filter }
  }

  pub fn share_options(&self, server: &str, tier: ShareTier) -> FetchOptions {
    let filters = self.filters(server);
    let filter = match tier {
      ShareTier::Read => filters.shared,
      ShareTier::Send => filters.shared_send,
      ShareTier::Manage => filters.shared_manage,
    };
    FetchOptions { attributes: self.attributes.shares.clone(), filter }
  }

  pub fn group_options(&self, server: &str, query: GroupQuery) -> FetchOptions {
    let filters = self.filters(server);
    let filter = match query {
      GroupQuery::Owned => filters.groups,
      GroupQuery::MemberOf => filters.groups_member,
      GroupQuery::ListsMemberOf => filters.lists_member,
    };
    FetchOptions { attributes: self.attributes.groups.clone(), filter }
  }

  /// `(owned, shared)` fetch options for a resource kind.
  pub fn resource_options(
    &self,
    server: &str,
    kind: ResourceKind,
  ) -> (FetchOptions, FetchOptions) {
    let filters = self.filters(server);
    let owned = filters.owned.get(&kind).cloned();
    let shared = filters.shared_resources.get(&kind).cloned();
    (
      FetchOptions { attributes: Vec::new(), filter: owned },
      FetchOptions { attributes: Vec::new(), filter: shared },
    )
  }
}

/// Filter overrides for one directory server. `None` keeps the backend's own
/// filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerFilters {
  pub user_infos:            Option<String>,
  pub user_infos_from_email: Option<String>,
  pub shared:                Option<String>,
  pub shared_send:           Option<String>,
  pub shared_manage:         Option<String>,
  pub groups:                Option<String>,
  pub groups_member:         Option<String>,
  pub lists_member:          Option<String>,
  /// Owned-resource filters by kind.
  pub owned:                 BTreeMap<ResourceKind, String>,
  /// Accessible-resource filters by kind.
  pub shared_resources:      BTreeMap<ResourceKind, String>,
}

/// Default attribute projections.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttributeSets {
  pub load:   Vec<String>,
  pub shares: Vec<String>,
  pub groups: Vec<String>,
}

impl Default for AttributeSets {
  fn default() -> Self {
    let owned = |list: &[&str]| list.iter().map(|s| (*s).to_owned()).collect();
    Self {
      load:   owned(&[
        "fullname",
        "uid",
        "name",
        "email",
        "email_list",
        "email_send",
        "email_send_list",
        "server_routage",
        "shares",
        "type",
      ]),
      shares: owned(&["fullname", "email_send", "email_send_list", "uid", "shares"]),
      groups: owned(&["dn", "fullname", "type", "email", "members"]),
    }
  }
}

/// External cache mirror settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  pub enabled:     bool,
  pub max_entries: usize,
  pub ttl_seconds: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self { enabled: false, max_entries: 10_000, ttl_seconds: 300 }
  }
}

impl CacheSettings {
  pub fn ttl(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.ttl_seconds)
  }
}
