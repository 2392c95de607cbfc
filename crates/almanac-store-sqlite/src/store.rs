//! [`SqliteStore`]: the SQLite implementation of [`DirectoryBackend`] and
//! [`PreferenceBackend`].
//!
//! Server filters in [`FetchOptions`] are directory query strings and have no
//! SQL meaning; they are ignored here. Attribute projections are honoured for
//! user lookups and share tiers.

use std::path::Path;

use almanac_core::{
  backend::{DirectoryBackend, FetchOptions, PreferenceBackend},
  group::GroupQuery,
  identity::{UserLookup, UserRecord},
  preference::PreferenceEntry,
  resource::{ResourceKind, ResourceRecord},
  share::{ShareRight, ShareTier, SharedMailbox},
};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result,
  encode::{
    RawGroup, RawPreference, RawResource, RawUser, encode_kind, encode_scope, encode_user,
    group_filter, tier_codes,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A directory and preference store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl std::fmt::Debug for SqliteStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteStore").finish_non_exhaustive()
  }
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    tracing::debug!(path = %path.as_ref().display(), "opening sqlite store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Seeding ───────────────────────────────────────────────────────────

  /// Insert or replace a directory entry, its addresses and its shares.
  pub async fn put_user(&self, record: &UserRecord) -> Result<()> {
    let Some(uid) = record.uid.clone() else {
      return Err(almanac_core::Error::UnresolvedIdentity.into());
    };
    let json = encode_user(record)?;
    let emails: Vec<String> =
      record.email.iter().chain(record.email_list.iter()).cloned().collect();
    let shares: Vec<(String, String)> = record
      .shares
      .iter()
      .map(|s| (s.principal.clone(), s.right.code().to_string()))
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO users (uid, record) VALUES (?1, ?2)
           ON CONFLICT(uid) DO UPDATE SET record = excluded.record",
          rusqlite::params![uid, json],
        )?;
        tx.execute("DELETE FROM user_emails WHERE uid = ?1", rusqlite::params![uid])?;
        for email in &emails {
          tx.execute(
            "INSERT OR IGNORE INTO user_emails (uid, email) VALUES (?1, ?2)",
            rusqlite::params![uid, email],
          )?;
        }
        tx.execute("DELETE FROM mailbox_shares WHERE mailbox_uid = ?1", rusqlite::params![uid])?;
        for (principal, right) in &shares {
          tx.execute(
            "INSERT INTO mailbox_shares (mailbox_uid, principal, share_right)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![uid, principal, right],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Share resource `id` of `kind` with `principal`.
  pub async fn grant(&self, kind: ResourceKind, id: &str, principal: &str) -> Result<()> {
    let kind_str = encode_kind(kind);
    let id_str = id.to_owned();
    let principal = principal.to_owned();

    let inserted = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM resources WHERE kind = ?1 AND id = ?2",
            rusqlite::params![kind_str, id_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if exists {
          conn.execute(
            "INSERT OR IGNORE INTO resource_grants (kind, id, principal) VALUES (?1, ?2, ?3)",
            rusqlite::params![kind_str, id_str, principal],
          )?;
        }
        Ok(exists)
      })
      .await?;

    if !inserted {
      return Err(Error::NotFound { what: "resource", id: id.to_owned() });
    }
    Ok(())
  }

  /// Give `principal` `right` on the mailbox of user `mailbox`.
  pub async fn share_mailbox(
    &self,
    mailbox: &str,
    principal: &str,
    right: ShareRight,
  ) -> Result<()> {
    let mailbox_str = mailbox.to_owned();
    let principal = principal.to_owned();
    let code = right.code().to_string();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO mailbox_shares (mailbox_uid, principal, share_right)
           SELECT uid, ?2, ?3 FROM users WHERE uid = ?1
           ON CONFLICT(mailbox_uid, principal) DO UPDATE SET share_right = excluded.share_right",
          rusqlite::params![mailbox_str, principal, code],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotFound { what: "user", id: mailbox.to_owned() });
    }
    Ok(())
  }

  /// Insert or replace a group, or a distribution list when `list` is set.
  pub async fn put_group(
    &self,
    dn: &str,
    fullname: &str,
    email: Option<&str>,
    owner: Option<&str>,
    list: bool,
  ) -> Result<()> {
    let dn = dn.to_owned();
    let fullname = fullname.to_owned();
    let email = email.map(str::to_owned);
    let owner = owner.map(str::to_owned);
    let kind = if list { "list" } else { "group" };

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO directory_groups (dn, fullname, email, kind, owner)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(dn) DO UPDATE SET
             fullname = excluded.fullname,
             email    = excluded.email,
             kind     = excluded.kind,
             owner    = excluded.owner",
          rusqlite::params![dn, fullname, email, kind, owner],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn add_group_member(&self, dn: &str, uid: &str) -> Result<()> {
    let dn_str = dn.to_owned();
    let uid = uid.to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO group_members (dn, uid)
           SELECT dn, ?2 FROM directory_groups WHERE dn = ?1",
          rusqlite::params![dn_str, uid],
        )?)
      })
      .await?;

    if changed == 0 {
      let known = self.group_exists(dn).await?;
      if !known {
        return Err(Error::NotFound { what: "group", id: dn.to_owned() });
      }
    }
    Ok(())
  }

  async fn group_exists(&self, dn: &str) -> Result<bool> {
    let dn = dn.to_owned();
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                "SELECT 1 FROM directory_groups WHERE dn = ?1",
                rusqlite::params![dn],
                |_| Ok(true),
              )
              .optional()?
              .unwrap_or(false),
          )
        })
        .await?,
    )
  }

  /// Every uid in the directory, sorted.
  pub async fn list_uids(&self) -> Result<Vec<String>> {
    Ok(
      self
        .conn
        .call(|conn| {
          let mut stmt = conn.prepare("SELECT uid FROM users ORDER BY uid")?;
          let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }
}

// ─── Row readers ─────────────────────────────────────────────────────────────

const RESOURCE_COLUMNS: &str = "r.id, r.owner, r.name, r.raw";

fn read_user(conn: &rusqlite::Connection, uid: &str) -> rusqlite::Result<Option<RawUser>> {
  let record: Option<String> = conn
    .query_row(
      "SELECT record FROM users WHERE uid = ?1",
      rusqlite::params![uid],
      |row| row.get(0),
    )
    .optional()?;
  let Some(record) = record else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT principal, share_right FROM mailbox_shares
     WHERE mailbox_uid = ?1 ORDER BY principal",
  )?;
  let shares = stmt
    .query_map(rusqlite::params![uid], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(RawUser { record, shares }))
}

fn read_resources(
  conn: &rusqlite::Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<RawResource>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt
    .query_map(params, RawResource::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

// ─── DirectoryBackend impl ───────────────────────────────────────────────────

impl DirectoryBackend for SqliteStore {
  type Error = Error;

  async fn fetch_user(
    &self,
    lookup: &UserLookup,
    options: &FetchOptions,
  ) -> Result<Option<UserRecord>> {
    let lookup = lookup.clone();

    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        let uid: Option<String> = match &lookup {
          UserLookup::Uid(uid) => Some(uid.clone()),
          UserLookup::Email(email) => conn
            .query_row(
              "SELECT uid FROM user_emails WHERE email = ?1 ORDER BY uid LIMIT 1",
              rusqlite::params![email],
              |row| row.get(0),
            )
            .optional()?,
        };
        match uid {
          Some(uid) => Ok(read_user(conn, &uid)?),
          None => Ok(None),
        }
      })
      .await?;

    raw
      .map(|raw| raw.into_record().map(|user| user.project(options)))
      .transpose()
  }

  async fn fetch_default(
    &self,
    kind: ResourceKind,
    owner: &str,
  ) -> Result<Option<ResourceRecord>> {
    let kind_str = encode_kind(kind);
    let owner = owner.to_owned();
    let scope = encode_scope(kind.scope());
    let name = kind.default_preference_name().to_owned();

    let raw: Option<RawResource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {RESOURCE_COLUMNS}
                 FROM preferences p
                 JOIN resources r ON r.kind = ?1 AND r.id = p.value
                 WHERE p.owner = ?2 AND p.scope = ?3 AND p.name = ?4"
              ),
              rusqlite::params![kind_str, owner, scope, name],
              RawResource::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawResource::into_record).transpose()
  }

  async fn fetch_owned(
    &self,
    kind: ResourceKind,
    owner: &str,
    _options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>> {
    let kind_str = encode_kind(kind);
    let owner = owner.to_owned();

    let raws = self
      .conn
      .call(move |conn| {
        Ok(read_resources(
          conn,
          &format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r
             WHERE r.kind = ?1 AND r.owner = ?2 ORDER BY r.id"
          ),
          rusqlite::params![kind_str, owner],
        )?)
      })
      .await?;

    raws.into_iter().map(RawResource::into_record).collect()
  }

  async fn fetch_shared(
    &self,
    kind: ResourceKind,
    owner: &str,
    _options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>> {
    let kind_str = encode_kind(kind);
    let owner = owner.to_owned();

    let raws = self
      .conn
      .call(move |conn| {
        Ok(read_resources(
          conn,
          &format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r
             WHERE r.kind = ?1
               AND (r.owner = ?2 OR EXISTS (
                 SELECT 1 FROM resource_grants g
                 WHERE g.kind = r.kind AND g.id = r.id AND g.principal = ?2))
             ORDER BY r.id"
          ),
          rusqlite::params![kind_str, owner],
        )?)
      })
      .await?;

    raws.into_iter().map(RawResource::into_record).collect()
  }

  /// Insert or update a resource. Updating a resource under a different owner
  /// is refused.
  async fn persist(&self, kind: ResourceKind, record: &ResourceRecord) -> Result<bool> {
    let kind_str = encode_kind(kind);
    let id = record.id.clone();
    let owner = record.owner.clone();
    let name = record.name.clone();
    let raw = serde_json::to_string(&record.raw)?;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO resources (kind, id, owner, name, raw) VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(kind, id) DO UPDATE SET name = excluded.name, raw = excluded.raw
           WHERE resources.owner = excluded.owner",
          rusqlite::params![kind_str, id, owner, name, raw],
        )?)
      })
      .await?;

    if changed == 0 {
      tracing::warn!(%kind, id = %record.id, "resource owner mismatch");
    }
    Ok(changed > 0)
  }

  async fn delete(&self, kind: ResourceKind, record: &ResourceRecord) -> Result<bool> {
    let kind_str = encode_kind(kind);
    let id = record.id.clone();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM resources WHERE kind = ?1 AND id = ?2",
          rusqlite::params![kind_str, id],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn fetch_share_tier(
    &self,
    tier: ShareTier,
    owner: &str,
    options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>> {
    let owner = owner.to_owned();
    let codes = tier_codes(tier);

    let raws: Vec<RawUser> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT mailbox_uid FROM mailbox_shares
           WHERE principal = ?1 AND instr(?2, share_right) > 0
           ORDER BY mailbox_uid",
        )?;
        let uids = stmt
          .query_map(rusqlite::params![owner, codes], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut users = Vec::with_capacity(uids.len());
        for uid in uids {
          if let Some(user) = read_user(conn, &uid)? {
            users.push(user);
          }
        }
        Ok(users)
      })
      .await?;

    let mut records = Vec::with_capacity(raws.len());
    for raw in raws {
      let user = raw.into_record()?;
      records.extend(SharedMailbox::record_for(&user, options));
    }
    Ok(records)
  }

  async fn fetch_groups(
    &self,
    query: GroupQuery,
    owner: &str,
    _options: &FetchOptions,
  ) -> Result<Vec<ResourceRecord>> {
    let owner = owner.to_owned();
    let (kind, membership) = group_filter(query);

    let raws: Vec<RawGroup> = self
      .conn
      .call(move |conn| {
        let sql = if membership {
          "SELECT g.dn, g.fullname, g.email, g.kind, g.owner
           FROM directory_groups g
           JOIN group_members m ON m.dn = g.dn
           WHERE m.uid = ?1 AND g.kind = ?2
           ORDER BY g.dn"
        } else {
          "SELECT g.dn, g.fullname, g.email, g.kind, g.owner
           FROM directory_groups g
           WHERE g.owner = ?1 AND g.kind = ?2
           ORDER BY g.dn"
        };
        let mut stmt = conn.prepare(sql)?;
        let mut groups = stmt
          .query_map(rusqlite::params![owner, kind], |row| {
            Ok(RawGroup {
              dn:       row.get(0)?,
              fullname: row.get(1)?,
              email:    row.get(2)?,
              kind:     row.get(3)?,
              owner:    row.get(4)?,
              members:  Vec::new(),
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut members =
          conn.prepare("SELECT uid FROM group_members WHERE dn = ?1 ORDER BY uid")?;
        for group in &mut groups {
          group.members = members
            .query_map(rusqlite::params![group.dn], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        }
        Ok(groups)
      })
      .await?;

    Ok(raws.into_iter().map(RawGroup::into_record).collect())
  }
}

// ─── PreferenceBackend impl ──────────────────────────────────────────────────

impl PreferenceBackend for SqliteStore {
  type Error = Error;

  async fn list_preferences(&self, owner: &str) -> Result<Vec<PreferenceEntry>> {
    let owner = owner.to_owned();

    let raws: Vec<RawPreference> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT owner, scope, name, value FROM preferences
           WHERE owner = ?1 ORDER BY scope, name",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![owner], |row| {
            Ok(RawPreference {
              owner: row.get(0)?,
              scope: row.get(1)?,
              name:  row.get(2)?,
              value: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPreference::into_entry).collect()
  }

  async fn persist_preference(&self, entry: &PreferenceEntry) -> Result<bool> {
    let owner = entry.owner.clone();
    let scope = encode_scope(entry.scope);
    let name = entry.name.clone();
    let value = entry.value.clone();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO preferences (owner, scope, name, value) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(owner, scope, name) DO UPDATE SET value = excluded.value",
          rusqlite::params![owner, scope, name, value],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  /// Deleting a preference that was never stored still succeeds.
  async fn delete_preference(&self, entry: &PreferenceEntry) -> Result<bool> {
    let owner = entry.owner.clone();
    let scope = encode_scope(entry.scope);
    let name = entry.name.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM preferences WHERE owner = ?1 AND scope = ?2 AND name = ?3",
          rusqlite::params![owner, scope, name],
        )?;
        Ok(())
      })
      .await?;
    Ok(true)
  }
}
