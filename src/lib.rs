//! Salted hash-tree commitments over numeric predictions.
//!
//! A batch of predictions is committed as one tree whose leaves are
//! `Hash(Encode(index, value) ‖ salt)`. Only the root leaves the system; individual
//! predictions are revealed later together with their salt and an inclusion proof.
use std::fs::{metadata, read_dir};
use std::path::Path;

pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod hashtree;
pub mod leaf;
pub mod ledger;
pub mod store;
pub mod types;

pub use config::{EngineConfig, StoreConfig};
pub use digest::{DIGEST_SIZE, Digest, HashAlgorithm};
pub use engine::{AuditReport, Engine};
pub use error::{Error, Result};
pub use hashtree::{Proof, Side, Sibling};
pub use leaf::{EncodingVersion, LeafRecord, SALT_SIZE, Salt};
pub use ledger::{Ledger, LocalLedger};
pub use store::{MemoryStore, RocksDbStore, Store};
pub use types::{Publication, Receipt, TreeId, TreeMeta};

/// Total size in bytes of a file, or of every file below a directory.
pub fn file_size<P: AsRef<Path>>(path: P) -> u64 {
  let path = path.as_ref();
  if path.is_file() {
    metadata(path).map(|m| m.len()).unwrap_or(0)
  } else if path.is_dir() {
    match read_dir(path) {
      Ok(entries) => entries.flat_map(std::result::Result::ok).map(|e| file_size(e.path())).sum(),
      Err(_) => 0,
    }
  } else {
    0
  }
}
