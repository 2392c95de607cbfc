//! User identity: how a user is looked up and what the directory returns.

use serde::{Deserialize, Serialize};

use crate::{backend::FetchOptions, share::Share};

/// The key a user is looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum UserLookup {
  Uid(String),
  Email(String),
}

/// Directory attributes of a user.
///
/// Fields are optional because a load may request only a subset of
/// attributes; [`UserRecord::merge`] folds a partial load into a fuller one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
  pub uid:             Option<String>,
  pub dn:              Option<String>,
  pub fullname:        Option<String>,
  pub name:            Option<String>,
  /// Mailbox type as reported by the directory (individual, shared, …).
  #[serde(rename = "type")]
  pub mailbox_type:    Option<String>,
  pub email:           Option<String>,
  #[serde(default)]
  pub email_list:      Vec<String>,
  pub email_send:      Option<String>,
  #[serde(default)]
  pub email_send_list: Vec<String>,
  #[serde(default)]
  pub server_routage:  Vec<String>,
  #[serde(default)]
  pub shares:          Vec<Share>,
}

impl UserRecord {
  /// Overwrite every field that `other` carries.
  pub fn merge(&mut self, other: UserRecord) {
    fn take<T>(dst: &mut Option<T>, src: Option<T>) {
      if src.is_some() {
        *dst = src;
      }
    }
    fn take_vec<T>(dst: &mut Vec<T>, src: Vec<T>) {
      if !src.is_empty() {
        *dst = src;
      }
    }

    take(&mut self.uid, other.uid);
    take(&mut self.dn, other.dn);
    take(&mut self.fullname, other.fullname);
    take(&mut self.name, other.name);
    take(&mut self.mailbox_type, other.mailbox_type);
    take(&mut self.email, other.email);
    take_vec(&mut self.email_list, other.email_list);
    take(&mut self.email_send, other.email_send);
    take_vec(&mut self.email_send_list, other.email_send_list);
    take_vec(&mut self.server_routage, other.server_routage);
    take_vec(&mut self.shares, other.shares);
  }

  /// A copy holding only the attributes `options` asks for. The uid always
  /// survives.
  pub fn project(&self, options: &FetchOptions) -> UserRecord {
    if options.attributes.is_empty() {
      return self.clone();
    }
    let pick = |attr: &str, value: &Option<String>| {
      if options.wants(attr) { value.clone() } else { None }
    };
    let pick_list = |attr: &str, value: &Vec<String>| {
      if options.wants(attr) { value.clone() } else { Vec::new() }
    };
    UserRecord {
      uid:             self.uid.clone(),
      dn:              pick("dn", &self.dn),
      fullname:        pick("fullname", &self.fullname),
      name:            pick("name", &self.name),
      mailbox_type:    pick("type", &self.mailbox_type),
      email:           pick("email", &self.email),
      email_list:      pick_list("email_list", &self.email_list),
      email_send:      pick("email_send", &self.email_send),
      email_send_list: pick_list("email_send_list", &self.email_send_list),
      server_routage:  pick_list("server_routage", &self.server_routage),
      shares:          if options.wants("shares") { self.shares.clone() } else { Vec::new() },
    }
  }

  /// Whether `address` is this user's primary address or one of its aliases.
  pub fn has_email(&self, address: &str) -> bool {
    self
      .email
      .iter()
      .chain(self.email_list.iter())
      .any(|e| e.eq_ignore_ascii_case(address))
  }
}

/// A user identity of the form `<user><delimiter><mailbox>`: a person acting
/// on a mailbox that has been shared with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShare {
  pub user:    String,
  pub mailbox: String,
}

impl ObjectShare {
  /// Split `identity` on `delimiter`. Returns `None` if it is not an object
  /// share or either half is empty.
  pub fn parse(identity: &str, delimiter: &str) -> Option<Self> {
    if delimiter.is_empty() {
      return None;
    }
    let (user, mailbox) = identity.split_once(delimiter)?;
    if user.is_empty() || mailbox.is_empty() {
      return None;
    }
    Some(Self { user: user.to_owned(), mailbox: mailbox.to_owned() })
  }
}
