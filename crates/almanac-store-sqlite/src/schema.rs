//! SQL schema for the Almanac SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Directory entries. `record` is the JSON-encoded attribute set without
-- shares, which live in `mailbox_shares`.
CREATE TABLE IF NOT EXISTS users (
    uid     TEXT PRIMARY KEY,
    record  TEXT NOT NULL
);

-- Primary address and aliases, for lookup by email.
CREATE TABLE IF NOT EXISTS user_emails (
    uid    TEXT NOT NULL REFERENCES users(uid) ON DELETE CASCADE,
    email  TEXT NOT NULL COLLATE NOCASE,
    PRIMARY KEY (uid, email)
);

-- Calendars, task lists and address books. The owner never changes.
CREATE TABLE IF NOT EXISTS resources (
    kind   TEXT NOT NULL,   -- 'calendar' | 'taskslist' | 'addressbook'
    id     TEXT NOT NULL,
    owner  TEXT NOT NULL,
    name   TEXT NOT NULL,
    raw    TEXT NOT NULL DEFAULT 'null',
    PRIMARY KEY (kind, id)
);

CREATE TABLE IF NOT EXISTS resource_grants (
    kind       TEXT NOT NULL,
    id         TEXT NOT NULL,
    principal  TEXT NOT NULL,
    PRIMARY KEY (kind, id, principal),
    FOREIGN KEY (kind, id) REFERENCES resources(kind, id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS preferences (
    owner  TEXT NOT NULL,
    scope  TEXT NOT NULL,   -- 'default' | 'calendar' | 'addressbook' | 'tasklist'
    name   TEXT NOT NULL,
    value  TEXT NOT NULL,
    PRIMARY KEY (owner, scope, name)
);

-- Rights granted on a mailbox: one letter, L / E / C / G.
CREATE TABLE IF NOT EXISTS mailbox_shares (
    mailbox_uid  TEXT NOT NULL REFERENCES users(uid) ON DELETE CASCADE,
    principal    TEXT NOT NULL,
    share_right  TEXT NOT NULL,
    PRIMARY KEY (mailbox_uid, principal)
);

CREATE TABLE IF NOT EXISTS directory_groups (
    dn        TEXT PRIMARY KEY,
    fullname  TEXT NOT NULL,
    email     TEXT,
    kind      TEXT NOT NULL CHECK (kind IN ('group', 'list')),
    owner     TEXT
);

CREATE TABLE IF NOT EXISTS group_members (
    dn   TEXT NOT NULL REFERENCES directory_groups(dn) ON DELETE CASCADE,
    uid  TEXT NOT NULL,
    PRIMARY KEY (dn, uid)
);

CREATE INDEX IF NOT EXISTS resources_owner_idx   ON resources(kind, owner);
CREATE INDEX IF NOT EXISTS grants_principal_idx  ON resource_grants(principal);
CREATE INDEX IF NOT EXISTS shares_principal_idx  ON mailbox_shares(principal);
CREATE INDEX IF NOT EXISTS members_uid_idx       ON group_members(uid);

PRAGMA user_version = 1;
";
