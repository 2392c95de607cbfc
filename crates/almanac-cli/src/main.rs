//! `almanac`: command-line access to the Almanac directory.
//!
//! Reads `almanac.toml` (or the path given with `--config`) plus `ALMANAC_*`
//! environment variables, opens the SQLite store and runs one subcommand
//! through the `User` aggregate.
//!
//! # Usage
//!
//! ```
//! almanac user add alice --fullname "Alice Liddell" --email alice@example.com
//! almanac resource add -u alice calendar Work
//! almanac resource default -u alice calendar
//! almanac share list -e alice@example.com --tier send
//! ```

mod cli;
mod commands;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use almanac_core::{
  Directory,
  cache::{CacheSync, MemoryCache},
  config::DirectoryConfig,
};
use almanac_store_sqlite::SqliteStore;
use anyhow::Context as _;
use clap::Parser;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

// ─── Config file ─────────────────────────────────────────────────────────────

/// Shape of `almanac.toml`.
#[derive(Deserialize, Debug)]
#[serde(default)]
struct CliConfig {
  store_path: PathBuf,
  directory:  DirectoryConfig,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("almanac.db"),
      directory:  DirectoryConfig::default(),
    }
  }
}

fn load_config(path: &Path) -> anyhow::Result<CliConfig> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("ALMANAC").separator("__"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise CliConfig")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let cfg = load_config(&cli.config)?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let settings = cfg.directory.cache.clone();
  let cache = Arc::new(MemoryCache::new(settings.max_entries, Some(settings.ttl())));
  let sync = if settings.enabled {
    CacheSync::new(Arc::clone(&cache))
  } else {
    CacheSync::disabled(Arc::clone(&cache))
  };
  let dir = Directory::new(Arc::new(store), cfg.directory, sync);

  commands::run(&dir, cli.server.as_deref(), cli.command).await?;

  if settings.enabled {
    tracing::debug!(entries = cache.len().await, "cache mirror");
  }
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(toml: &str) -> CliConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = parse("");
    assert_eq!(cfg.store_path, PathBuf::from("almanac.db"));
    assert_eq!(cfg.directory.default_server, "default");
    assert!(!cfg.directory.cache.enabled);
  }

  #[test]
  fn directory_section_is_read() {
    let cfg = parse(
      r#"
      store_path = "/tmp/almanac.db"

      [directory]
      default_server = "ldap1"

      [directory.servers.ldap1]
      shared_send = "(mailPR=*C*)"

      [directory.cache]
      enabled = true
      "#,
    );
    assert_eq!(cfg.store_path, PathBuf::from("/tmp/almanac.db"));
    assert_eq!(cfg.directory.default_server, "ldap1");
    assert_eq!(
      cfg.directory.filters("ldap1").shared_send.as_deref(),
      Some("(mailPR=*C*)")
    );
    assert!(cfg.directory.cache.enabled);
    assert_eq!(cfg.directory.cache.max_entries, 10_000);
  }

  #[test]
  fn tilde_expands_against_home() {
    let plain = expand_tilde(Path::new("/var/lib/almanac.db"));
    assert_eq!(plain, PathBuf::from("/var/lib/almanac.db"));
  }
}
