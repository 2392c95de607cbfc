//! Error type for `almanac-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] almanac_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A seeding call referred to a row that does not exist.
  #[error("{what} not found: {id}")]
  NotFound { what: &'static str, id: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
