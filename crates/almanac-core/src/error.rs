//! Error types for `almanac-core`.

use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub enum Error {
  /// A fetch or persist call could not complete.
  #[error("backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The backend answered but did not confirm the write.
  #[error("{what} was not confirmed by the backend")]
  Rejected { what: String },

  #[error("user identity could not be resolved from a uid or an email")]
  UnresolvedIdentity,

  #[error("unknown {what} tag: {value:?}")]
  UnknownTag { what: &'static str, value: String },

  /// A resource of one kind was offered where another kind is expected.
  #[error("expected a {expected}, got a {found}")]
  KindMismatch { expected: ResourceKind, found: ResourceKind },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box any backend error into [`Error::Backend`].
  pub fn backend<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Backend(Box::new(err))
  }

  pub(crate) fn rejected(what: impl Into<String>) -> Self {
    Self::Rejected { what: what.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
