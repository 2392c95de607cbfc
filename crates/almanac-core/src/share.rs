//! Mailbox sharing: access rights, share tiers and the per-user share index.

use std::{fmt, future::Future, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
  Error, Result,
  backend::{DirectoryBackend, FetchOptions},
  identity::UserRecord,
  index::{FromRecord, IndexKey, LazyIndex},
  resource::ResourceRecord,
};

// ─── Tiers ───────────────────────────────────────────────────────────────────

/// Access level a mailbox is shared at.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ShareTier {
  /// Any right at all on the mailbox.
  Read,
  /// May send as the mailbox.
  Send,
  /// May manage the mailbox.
  Manage,
}

impl IndexKey for ShareTier {
  fn fetch<'a, D: DirectoryBackend>(
    self,
    store: &'a D,
    owner: &'a str,
    options: &'a FetchOptions,
  ) -> impl Future<Output = Result<Vec<ResourceRecord>, D::Error>> + Send + 'a {
    store.fetch_share_tier(self, owner, options)
  }
}

// ─── Rights ──────────────────────────────────────────────────────────────────

/// A right granted on a mailbox, encoded by the directory as one letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShareRight {
  /// `L`
  Read,
  /// `E`
  Write,
  /// `C`
  Send,
  /// `G`
  Admin,
}

impl ShareRight {
  pub const ALL: [ShareRight; 4] = [Self::Read, Self::Write, Self::Send, Self::Admin];

  pub fn code(self) -> char {
    match self {
      Self::Read => 'L',
      Self::Write => 'E',
      Self::Send => 'C',
      Self::Admin => 'G',
    }
  }

  pub fn from_code(code: char) -> Option<Self> {
    match code.to_ascii_uppercase() {
      'L' => Some(Self::Read),
      'E' => Some(Self::Write),
      'C' => Some(Self::Send),
      'G' => Some(Self::Admin),
      _ => None,
    }
  }

  /// Whether holding this right places a mailbox in `tier`.
  pub fn grants(self, tier: ShareTier) -> bool {
    match tier {
      ShareTier::Read => true,
      ShareTier::Send => matches!(self, Self::Send | Self::Admin),
      ShareTier::Manage => matches!(self, Self::Admin),
    }
  }
}

/// One entry of a mailbox's share list, written `<uid>:<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Share {
  pub principal: String,
  pub right:     ShareRight,
}

impl fmt::Display for Share {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.principal, self.right.code())
  }
}

impl FromStr for Share {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let unknown = || Error::UnknownTag { what: "share", value: s.to_owned() };
    let (principal, code) = s.rsplit_once(':').ok_or_else(unknown)?;
    let mut chars = code.chars();
    let right = match (chars.next(), chars.next()) {
      (Some(c), None) => ShareRight::from_code(c).ok_or_else(unknown)?,
      _ => return Err(unknown()),
    };
    if principal.is_empty() {
      return Err(unknown());
    }
    Ok(Self { principal: principal.to_owned(), right })
  }
}

impl TryFrom<String> for Share {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { value.parse() }
}

impl From<Share> for String {
  fn from(value: Share) -> Self { value.to_string() }
}

// ─── Shared mailboxes ────────────────────────────────────────────────────────

/// A mailbox visible to the user through a share tier.
///
/// The record's `raw` payload carries the mailbox's own directory attributes,
/// so it can be rehydrated into a full user with [`SharedMailbox::user_record`].
#[derive(Debug, Clone)]
pub struct SharedMailbox {
  record: ResourceRecord,
}

impl SharedMailbox {
  /// The share-tier record a backend returns for mailbox `user`, carrying the
  /// projected attributes in `raw`. `None` if the user has no uid.
  pub fn record_for(user: &UserRecord, options: &FetchOptions) -> Option<ResourceRecord> {
    let uid = user.uid.clone()?;
    let mut record =
      ResourceRecord::new(uid.clone(), uid, user.fullname.clone().unwrap_or_default());
    record.raw = serde_json::to_value(user.project(options)).unwrap_or_default();
    Some(record)
  }

  pub fn uid(&self) -> &str { &self.record.id }

  pub fn fullname(&self) -> &str { &self.record.name }

  pub fn user_record(&self) -> Result<UserRecord> {
    let mut user: UserRecord = if self.record.raw.is_null() {
      UserRecord::default()
    } else {
      serde_json::from_value(self.record.raw.clone())?
    };
    if user.uid.is_none() {
      user.uid = Some(self.record.id.clone());
    }
    if user.fullname.is_none() && !self.record.name.is_empty() {
      user.fullname = Some(self.record.name.clone());
    }
    Ok(user)
  }
}

impl FromRecord for SharedMailbox {
  fn from_record(record: ResourceRecord) -> Self { Self { record } }

  fn record(&self) -> &ResourceRecord { &self.record }
}

/// Shared mailboxes per tier, each tier memoised on its own.
pub type ShareIndex = LazyIndex<ShareTier, SharedMailbox>;
