//! Groups and distribution lists related to a user.

use std::future::Future;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
  Result,
  backend::{DirectoryBackend, FetchOptions},
  index::{FromRecord, IndexKey, LazyIndex},
  resource::ResourceRecord,
};

/// Which groups to list for a user.
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
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GroupQuery {
  /// Groups the user owns or manages.
  Owned,
  /// Groups the user is a member of.
  MemberOf,
  /// Distribution lists the user is a member of.
  ListsMemberOf,
}

impl IndexKey for GroupQuery {
  fn fetch<'a, D: DirectoryBackend>(
    self,
    store: &'a D,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, D::Error>> + Send + 'a {
    store.fetch_groups(self, owner, options)
  }
}

/// A directory group. `raw` may carry `email` and a `members` uid array.
#[derive(Debug, Clone)]
pub struct Group {
  record: ResourceRecord,
}

impl Group {
  pub fn dn(&self) -> &str { &self.record.id }

  pub fn fullname(&self) -> &str { &self.record.name }

  pub fn email(&self) -> Option<&str> {
    self.record.raw.get("email").and_then(|v| v.as_str())
  }

  pub fn members(&self) -> Vec<String> {
    self
      .record
      .raw
      .get("members")
      .and_then(|v| v.as_array())
      .map(|members| {
        members
          .iter()
          .filter_map(|m| m.as_str().map(str::to_owned))
          .collect()
      })
      .unwrap_or_default()
  }
}

impl FromRecord for Group {
  fn from_record(record: ResourceRecord) -> Self { Self { record } }

  fn record(&self) -> &ResourceRecord { &self.record }
}

/// Group query results, each query memoised on its own.
pub type GroupIndex = LazyIndex<GroupQuery, Group>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn members_read_from_raw() {
    let mut record = ResourceRecord::new("cn=team", "alice", "Team");
    record.raw = serde_json::json!({ "email": "team@example.com", "members": ["alice", "bob"] });
    let group = Group::from_record(record);
    assert_eq!(group.email(), Some("team@example.com"));
    assert_eq!(group.members(), vec!["alice".to_owned(), "bob".to_owned()]);
  }

  #[test]
  fn members_default_to_empty() {
    let group = Group::from_record(ResourceRecord::new("cn=x", "", "X"));
    assert!(group.members().is_empty());
    assert_eq!(group.email(), None);
  }

  #[test]
  fn query_tags() {
    assert_eq!(GroupQuery::ListsMemberOf.to_string(), "lists_member_of");
    assert_eq!("member_of".parse::<GroupQuery>().unwrap(), GroupQuery::MemberOf);
  }
}
