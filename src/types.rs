use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::digest::{Digest, HashAlgorithm};
use crate::error::{Error, Result};
use crate::leaf::EncodingVersion;

/// Identifier of one immutable leaf batch and its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeId(Uuid);

impl TreeId {
  /// A fresh random identifier.
  pub fn new() -> Self {
    TreeId(Uuid::new_v4())
  }

  pub const fn from_bytes(bytes: [u8; 16]) -> Self {
    TreeId(Uuid::from_bytes(bytes))
  }

  pub fn from_slice(bytes: &[u8]) -> Result<Self> {
    let bytes: [u8; 16] =
      bytes.try_into().map_err(|_| Error::InvalidRecord(format!("tree id must be 16 bytes, got {}", bytes.len())))?;
    Ok(TreeId::from_bytes(bytes))
  }

  pub fn as_bytes(&self) -> &[u8; 16] {
    self.0.as_bytes()
  }
}

impl Default for TreeId {
  fn default() -> Self {
    Self::new()
  }
}

impl Display for TreeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Display::fmt(&self.0, f)
  }
}

impl FromStr for TreeId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Uuid::parse_str(s).map(TreeId).map_err(|e| Error::InvalidRecord(format!("tree id: {e}")))
  }
}

/// The committed root of a tree and how it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMeta {
  pub tree_id: TreeId,
  pub root: Digest,
  pub leaf_count: u64,
  pub created_at: DateTime<Utc>,
  pub encoding: EncodingVersion,
  pub algorithm: HashAlgorithm,
}

/// Transaction identifier returned by the ledger for a root submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub String);

impl Display for Receipt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One submission of a tree's root to the ledger. A root may be published any number of
/// times; the root itself never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
  pub published_at: DateTime<Utc>,
  pub receipt: Receipt,
}

/// Current time truncated to the millisecond precision the stores persist.
pub(crate) fn now() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
