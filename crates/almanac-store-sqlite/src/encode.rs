//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Tags (kind, scope, share right) are stored as their lowercase names or
//! single-letter codes. Attribute sets are stored as compact JSON.

use almanac_core::{
  group::GroupQuery,
  identity::UserRecord,
  preference::{PreferenceEntry, Scope},
  resource::{ResourceKind, ResourceRecord},
  share::{Share, ShareRight, ShareTier},
};
use serde_json::json;

use crate::Result;

// ─── Tags ────────────────────────────────────────────────────────────────────

pub fn encode_kind(kind: ResourceKind) -> String { kind.as_ref().to_owned() }

pub fn encode_scope(scope: Scope) -> String { scope.as_ref().to_owned() }

pub fn decode_scope(s: &str) -> Result<Scope> {
  s.parse().map_err(|_| {
    almanac_core::Error::UnknownTag { what: "scope", value: s.to_owned() }.into()
  })
}

pub fn decode_right(s: &str) -> Result<ShareRight> {
  let mut chars = s.chars();
  match (chars.next().and_then(ShareRight::from_code), chars.next()) {
    (Some(right), None) => Ok(right),
    _ => Err(
      almanac_core::Error::UnknownTag { what: "share right", value: s.to_owned() }.into(),
    ),
  }
}

/// Every right code that places a mailbox in `tier`, concatenated.
pub fn tier_codes(tier: ShareTier) -> String {
  ShareRight::ALL
    .into_iter()
    .filter(|r| r.grants(tier))
    .map(ShareRight::code)
    .collect()
}

/// `(kind filter, membership required)` for a group query.
pub fn group_filter(query: GroupQuery) -> (&'static str, bool) {
  match query {
    GroupQuery::Owned => ("group", false),
    GroupQuery::MemberOf => ("group", true),
    GroupQuery::ListsMemberOf => ("list", true),
  }
}

// ─── User record ─────────────────────────────────────────────────────────────

/// The JSON stored in `users.record`: everything but the shares.
pub fn encode_user(record: &UserRecord) -> Result<String> {
  let stored = UserRecord { shares: Vec::new(), ..record.clone() };
  Ok(serde_json::to_string(&stored)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read from a `resources` row.
pub struct RawResource {
  pub id:    String,
  pub owner: String,
  pub name:  String,
  pub raw:   String,
}

impl RawResource {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:    row.get(0)?,
      owner: row.get(1)?,
      name:  row.get(2)?,
      raw:   row.get(3)?,
    })
  }

  pub fn into_record(self) -> Result<ResourceRecord> {
    let mut record = ResourceRecord::new(self.id, self.owner, self.name);
    record.raw = serde_json::from_str(&self.raw)?;
    Ok(record)
  }
}

/// A `users` row with its `mailbox_shares` rows.
pub struct RawUser {
  pub record: String,
  /// `(principal, share_right)`
  pub shares: Vec<(String, String)>,
}

impl RawUser {
  pub fn into_record(self) -> Result<UserRecord> {
    let mut record: UserRecord = serde_json::from_str(&self.record)?;
    record.shares = self
      .shares
      .into_iter()
      .map(|(principal, right)| Ok(Share { principal, right: decode_right(&right)? }))
      .collect::<Result<_>>()?;
    Ok(record)
  }
}

/// Raw strings read from a `preferences` row.
pub struct RawPreference {
  pub owner: String,
  pub scope: String,
  pub name:  String,
  pub value: String,
}

impl RawPreference {
  pub fn into_entry(self) -> Result<PreferenceEntry> {
    Ok(PreferenceEntry {
      owner: self.owner,
      scope: decode_scope(&self.scope)?,
      name:  self.name,
      value: self.value,
    })
  }
}

/// A `directory_groups` row with its member uids.
pub struct RawGroup {
  pub dn:       String,
  pub fullname: String,
  pub email:    Option<String>,
  pub kind:     String,
  pub owner:    Option<String>,
  pub members:  Vec<String>,
}

impl RawGroup {
  pub fn into_record(self) -> ResourceRecord {
    let mut record =
      ResourceRecord::new(self.dn, self.owner.unwrap_or_default(), self.fullname);
    record.raw = json!({
      "type": self.kind,
      "email": self.email,
      "members": self.members,
    });
    record
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tier_codes_follow_grants() {
    assert_eq!(tier_codes(ShareTier::Read), "LECG");
    assert_eq!(tier_codes(ShareTier::Send), "CG");
    assert_eq!(tier_codes(ShareTier::Manage), "G");
  }

  #[test]
  fn unknown_right_is_rejected() {
    assert!(decode_right("X").is_err());
    assert!(decode_right("LG").is_err());
    assert_eq!(decode_right("g").unwrap(), ShareRight::Admin);
  }
}
