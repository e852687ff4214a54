use std::sync::PoisonError;

use thiserror::Error;

use crate::types::TreeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("tree not found: {0}")]
  TreeNotFound(TreeId),

  #[error("leaf {index} not found in tree {tree_id}")]
  LeafNotFound { tree_id: TreeId, index: u64 },

  #[error("leaf index {index} is out of range for {leaf_count} leaves")]
  IndexOutOfRange { index: u64, leaf_count: u64 },

  #[error("tree already exists: {0}")]
  TreeConflict(TreeId),

  #[error("duplicate leaf index {index} in tree {tree_id}")]
  LeafConflict { tree_id: TreeId, index: u64 },

  #[error("publication at {published_at} already recorded for tree {tree_id}")]
  PublicationConflict { tree_id: TreeId, published_at: i64 },

  #[error("cannot encode leaf {index} with value {value}: {reason}")]
  Encoding { index: u64, value: f64, reason: &'static str },

  #[error("corrupt tree {tree_id}: {reason}")]
  CorruptTree { tree_id: TreeId, reason: String },

  #[error("tree {0} is quarantined after a failed integrity check")]
  Quarantined(TreeId),

  #[error("a tree needs at least one leaf")]
  EmptyTree,

  #[error("invalid record: {0}")]
  InvalidRecord(String),

  #[error("ledger error: {0}")]
  Ledger(String),

  #[error("lock poisoned: {0}")]
  Poisoned(String),

  #[error(transparent)]
  Storage(#[from] rocksdb::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Config(#[from] toml::de::Error),
}

impl Error {
  /// Unknown tree or leaf. Callers treat this as "nothing to prove".
  pub fn is_not_found(&self) -> bool {
    matches!(self, Error::TreeNotFound(_) | Error::LeafNotFound { .. } | Error::IndexOutOfRange { .. })
  }

  pub fn is_conflict(&self) -> bool {
    matches!(self, Error::TreeConflict(_) | Error::LeafConflict { .. } | Error::PublicationConflict { .. })
  }

  /// Integrity faults that must stop proof issuance for the affected tree.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Error::CorruptTree { .. } | Error::Quarantined(_))
  }
}

impl<T> From<PoisonError<T>> for Error {
  fn from(err: PoisonError<T>) -> Self {
    Error::Poisoned(err.to_string())
  }
}
