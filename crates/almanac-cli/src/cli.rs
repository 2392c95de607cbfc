//! Command-line surface.

use std::path::PathBuf;

use almanac_core::{
  group::GroupQuery,
  preference::Scope,
  resource::ResourceKind,
  share::{ShareRight, ShareTier},
};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "almanac", version, about = "Inspect and edit the Almanac directory")]
pub struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "almanac.toml")]
  pub config: PathBuf,

  /// Directory server to act on (defaults to `default_server`).
  #[arg(long, global = true)]
  pub server: Option<String>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Directory entries.
  #[command(subcommand)]
  User(UserCommand),
  /// Calendars, task lists and address books.
  #[command(subcommand)]
  Resource(ResourceCommand),
  /// Per-user preferences.
  #[command(subcommand)]
  Pref(PrefCommand),
  /// Mailbox shares.
  #[command(subcommand)]
  Share(ShareCommand),
  /// Groups and distribution lists.
  #[command(subcommand)]
  Group(GroupCommand),
}

/// Who a command acts for: a uid, an email, or both.
#[derive(Args, Debug, Clone)]
pub struct Identity {
  /// The user's uid.
  #[arg(long, short = 'u', required_unless_present = "email")]
  pub uid:   Option<String>,
  /// The user's email address.
  #[arg(long, short = 'e')]
  pub email: Option<String>,
}

// ─── user ────────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum UserCommand {
  /// Add or replace a directory entry.
  Add {
    uid:      String,
    #[arg(long)]
    fullname: Option<String>,
    #[arg(long)]
    email:    Option<String>,
    /// Additional addresses; repeatable.
    #[arg(long = "alias")]
    aliases:  Vec<String>,
  },
  /// Load a user and print what the aggregate holds.
  Show {
    #[command(flatten)]
    who: Identity,
  },
}

// ─── resource ────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum ResourceCommand {
  /// Create a resource owned by the user.
  Add {
    #[command(flatten)]
    who:  Identity,
    kind: ResourceKind,
    name: String,
    /// Use this id instead of a generated one.
    #[arg(long)]
    id:   Option<String>,
  },
  /// Share a resource with another principal.
  Grant {
    kind:      ResourceKind,
    id:        String,
    principal: String,
  },
  /// List owned resources, or every accessible one with `--shared`.
  List {
    #[command(flatten)]
    who:    Identity,
    kind:   ResourceKind,
    #[arg(long)]
    shared: bool,
  },
  /// Resolve the user's default resource.
  Default {
    #[command(flatten)]
    who:  Identity,
    kind: ResourceKind,
  },
  /// Record an accessible resource as the user's default.
  SetDefault {
    #[command(flatten)]
    who:  Identity,
    kind: ResourceKind,
    id:   String,
  },
  /// Create the user's default resource.
  CreateDefault {
    #[command(flatten)]
    who:      Identity,
    kind:     ResourceKind,
    /// Display name template; `%%uid%%`, `%%fullname%%`, `%%name%%` and
    /// `%%email%%` are substituted.
    #[arg(long)]
    template: Option<String>,
  },
}

// ─── pref ────────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum PrefCommand {
  Get {
    #[command(flatten)]
    who:   Identity,
    scope: Scope,
    name:  String,
  },
  Set {
    #[command(flatten)]
    who:   Identity,
    scope: Scope,
    name:  String,
    value: String,
  },
  Delete {
    #[command(flatten)]
    who:   Identity,
    scope: Scope,
    name:  String,
  },
}

// ─── share ───────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum ShareCommand {
  /// Give `principal` a right on `mailbox`.
  Grant {
    mailbox:   String,
    principal: String,
    /// One of L (read), E (write), C (send), G (manage).
    #[arg(value_parser = parse_right)]
    right:     ShareRight,
  },
  /// Mailboxes shared with the user at a tier.
  List {
    #[command(flatten)]
    who:  Identity,
    #[arg(long, default_value = "read")]
    tier: ShareTier,
  },
}

// ─── group ───────────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
  /// Add or replace a group.
  Add {
    dn:       String,
    fullname: String,
    #[arg(long)]
    email:    Option<String>,
    #[arg(long)]
    owner:    Option<String>,
    /// Create a distribution list rather than a group.
    #[arg(long)]
    list:     bool,
  },
  /// Add a member to a group.
  Member { dn: String, uid: String },
  /// Groups related to the user.
  List {
    #[command(flatten)]
    who:   Identity,
    #[arg(long, default_value = "member_of")]
    query: GroupQuery,
  },
}

fn parse_right(s: &str) -> Result<ShareRight, String> {
  let mut chars = s.chars();
  match (chars.next().and_then(ShareRight::from_code), chars.next()) {
    (Some(right), None) => Ok(right),
    _ => Err(format!("`{s}` is not one of L, E, C, G")),
  }
}
