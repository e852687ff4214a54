use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::digest::{DIGEST_SIZE, Digest, HashAlgorithm};
use crate::error::{Error, Result};
use crate::leaf::{EncodingVersion, LeafRecord, SALT_SIZE};
use crate::types::{Publication, Receipt, TreeId, TreeMeta};

pub mod memory;
pub mod rocksdb;

pub use self::memory::MemoryStore;
pub use self::rocksdb::RocksDbStore;

/// Durable leaf and root persistence, keyed by tree.
///
/// A store never recomputes digests. It only guarantees that a tree and all of its leaves
/// become visible together, and that tree ids and `(tree_id, index)` pairs are unique.
pub trait Store: Send + Sync {
  /// Atomically writes the tree metadata and its complete leaf batch.
  fn create_tree(&self, meta: &TreeMeta, leaves: &[LeafRecord]) -> Result<()>;

  fn tree(&self, tree_id: &TreeId) -> Result<TreeMeta>;

  fn tree_ids(&self) -> Result<Vec<TreeId>>;

  fn leaf(&self, tree_id: &TreeId, index: u64) -> Result<LeafRecord>;

  /// All leaves ordered by index.
  fn leaves(&self, tree_id: &TreeId) -> Result<Vec<LeafRecord>>;

  /// All leaf digests ordered by index.
  fn leaf_digests(&self, tree_id: &TreeId) -> Result<Vec<Digest>>;

  fn record_publication(&self, tree_id: &TreeId, publication: &Publication) -> Result<()>;

  /// Publications of the tree's root, oldest first.
  fn publications(&self, tree_id: &TreeId) -> Result<Vec<Publication>>;

  /// Whether a publication at exactly `published_at` is already recorded for the tree.
  fn has_publication(&self, tree_id: &TreeId, published_at: &DateTime<Utc>) -> Result<bool> {
    Ok(self.publications(tree_id)?.iter().any(|p| p.published_at == *published_at))
  }

  fn root(&self, tree_id: &TreeId) -> Result<Digest> {
    self.tree(tree_id).map(|meta| meta.root)
  }
}

macro_rules! delegate_store {
  ($ptr:ident) => {
    impl<S: Store + ?Sized> Store for $ptr<S> {
      fn create_tree(&self, meta: &TreeMeta, leaves: &[LeafRecord]) -> Result<()> {
        (**self).create_tree(meta, leaves)
      }
      fn tree(&self, tree_id: &TreeId) -> Result<TreeMeta> {
        (**self).tree(tree_id)
      }
      fn tree_ids(&self) -> Result<Vec<TreeId>> {
        (**self).tree_ids()
      }
      fn leaf(&self, tree_id: &TreeId, index: u64) -> Result<LeafRecord> {
        (**self).leaf(tree_id, index)
      }
      fn leaves(&self, tree_id: &TreeId) -> Result<Vec<LeafRecord>> {
        (**self).leaves(tree_id)
      }
      fn leaf_digests(&self, tree_id: &TreeId) -> Result<Vec<Digest>> {
        (**self).leaf_digests(tree_id)
      }
      fn record_publication(&self, tree_id: &TreeId, publication: &Publication) -> Result<()> {
        (**self).record_publication(tree_id, publication)
      }
      fn publications(&self, tree_id: &TreeId) -> Result<Vec<Publication>> {
        (**self).publications(tree_id)
      }
      fn has_publication(&self, tree_id: &TreeId, published_at: &DateTime<Utc>) -> Result<bool> {
        (**self).has_publication(tree_id, published_at)
      }
    }
  };
}

delegate_store!(Box);
delegate_store!(Arc);

/// Checks that `leaves` is a complete batch for `meta`: non-empty, no repeated index, and
/// exactly the indices `0..leaf_count`.
pub(crate) fn validate_batch(meta: &TreeMeta, leaves: &[LeafRecord]) -> Result<()> {
  if leaves.is_empty() {
    return Err(Error::EmptyTree);
  }
  if meta.leaf_count != leaves.len() as u64 {
    return Err(Error::InvalidRecord(format!(
      "tree {} declares {} leaves but the batch has {}",
      meta.tree_id,
      meta.leaf_count,
      leaves.len()
    )));
  }
  let mut seen = vec![false; leaves.len()];
  for leaf in leaves {
    if leaf.index >= meta.leaf_count {
      return Err(Error::InvalidRecord(format!(
        "leaf index {} is outside 0..{} in tree {}",
        leaf.index, meta.leaf_count, meta.tree_id
      )));
    }
    let slot = &mut seen[leaf.index as usize];
    if *slot {
      return Err(Error::LeafConflict { tree_id: meta.tree_id, index: leaf.index });
    }
    *slot = true;
  }
  Ok(())
}

/// Fixed binary layout of a persisted row. The parts of the row that live in the key are
/// handed back to `read`.
pub(crate) trait Record: Sized {
  type Key;

  fn write<W: Write>(&self, w: &mut W) -> Result<usize>;

  fn read<R: Read>(r: &mut R, key: Self::Key) -> Result<Self>;
}

impl Record for LeafRecord {
  type Key = u64;

  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    // Value (8 bytes)
    w.write_f64::<BigEndian>(self.value)?;

    // Salt (32 bytes)
    w.write_all(&self.salt)?;

    // Digest (32 bytes)
    w.write_all(self.digest.as_bytes())?;
    Ok(8 + SALT_SIZE + DIGEST_SIZE)
  }

  fn read<R: Read>(r: &mut R, index: u64) -> Result<Self> {
    let value = r.read_f64::<BigEndian>()?;
    let mut salt = [0u8; SALT_SIZE];
    r.read_exact(&mut salt)?;
    let mut digest = [0u8; DIGEST_SIZE];
    r.read_exact(&mut digest)?;
    Ok(LeafRecord { index, value, salt, digest: Digest::new(digest) })
  }
}

impl Record for TreeMeta {
  type Key = TreeId;

  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    w.write_all(self.root.as_bytes())?;
    w.write_u64::<BigEndian>(self.leaf_count)?;
    w.write_i64::<BigEndian>(self.created_at.timestamp_millis())?;
    w.write_u8(self.encoding.tag())?;
    w.write_u8(self.algorithm.tag())?;
    Ok(DIGEST_SIZE + 8 + 8 + 1 + 1)
  }

  fn read<R: Read>(r: &mut R, tree_id: TreeId) -> Result<Self> {
    let mut root = [0u8; DIGEST_SIZE];
    r.read_exact(&mut root)?;
    let leaf_count = r.read_u64::<BigEndian>()?;
    let created_at = read_timestamp(r.read_i64::<BigEndian>()?)?;
    let encoding = EncodingVersion::from_tag(r.read_u8()?)?;
    let algorithm = HashAlgorithm::from_tag(r.read_u8()?)?;
    Ok(TreeMeta { tree_id, root: Digest::new(root), leaf_count, created_at, encoding, algorithm })
  }
}

impl Record for Publication {
  type Key = DateTime<Utc>;

  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    let receipt = self.receipt.0.as_bytes();
    w.write_u32::<BigEndian>(receipt.len() as u32)?;
    w.write_all(receipt)?;
    Ok(4 + receipt.len())
  }

  fn read<R: Read>(r: &mut R, published_at: DateTime<Utc>) -> Result<Self> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut receipt = vec![0u8; len];
    r.read_exact(&mut receipt)?;
    let receipt = String::from_utf8(receipt).map_err(|e| Error::InvalidRecord(format!("receipt: {e}")))?;
    Ok(Publication { published_at, receipt: Receipt(receipt) })
  }
}

pub(crate) fn read_timestamp(millis: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(millis).ok_or_else(|| Error::InvalidRecord(format!("timestamp out of range: {millis}")))
}

/// Fixtures shared by the backend test suites.
#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::hashtree;
  use crate::types::now;

  pub(crate) fn fixture(n: u64) -> (TreeMeta, Vec<LeafRecord>) {
    let algorithm = HashAlgorithm::Keccak256;
    let leaves = (0..n)
      .map(|i| LeafRecord::new(algorithm, i, i as f64 * 1.5, [i as u8 ^ 0x5a; SALT_SIZE]).unwrap())
      .collect::<Vec<_>>();
    let root = hashtree::root(algorithm, leaves.iter().map(|l| l.digest).collect()).unwrap();
    let meta = TreeMeta {
      tree_id: TreeId::new(),
      root,
      leaf_count: n,
      created_at: now(),
      encoding: EncodingVersion::V1,
      algorithm,
    };
    (meta, leaves)
  }

  pub(crate) fn publication(seconds: i64, receipt: &str) -> Publication {
    let published_at = DateTime::from_timestamp(seconds, 0).unwrap();
    Publication { published_at, receipt: Receipt(receipt.to_string()) }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;
  use crate::types::now;

  fn meta(leaf_count: u64) -> TreeMeta {
    TreeMeta {
      tree_id: TreeId::new(),
      root: HashAlgorithm::Keccak256.hash(&[b"root"]),
      leaf_count,
      created_at: now(),
      encoding: EncodingVersion::V1,
      algorithm: HashAlgorithm::Keccak256,
    }
  }

  fn leaf(index: u64) -> LeafRecord {
    LeafRecord::new(HashAlgorithm::Keccak256, index, index as f64 / 10.0, [index as u8; SALT_SIZE]).unwrap()
  }

  #[test]
  fn batch_validation() {
    let m = meta(3);
    assert!(validate_batch(&m, &[leaf(0), leaf(1), leaf(2)]).is_ok());
    assert!(validate_batch(&m, &[leaf(2), leaf(0), leaf(1)]).is_ok());
    assert!(matches!(validate_batch(&m, &[]), Err(Error::EmptyTree)));
    assert!(matches!(validate_batch(&m, &[leaf(0), leaf(1)]), Err(Error::InvalidRecord(_))));
    assert!(matches!(validate_batch(&m, &[leaf(0), leaf(1), leaf(3)]), Err(Error::InvalidRecord(_))));
    assert!(matches!(validate_batch(&m, &[leaf(0), leaf(1), leaf(1)]), Err(Error::LeafConflict { index: 1, .. })));
  }

  #[test]
  fn leaf_record_layout() {
    let l = leaf(5);
    let mut buffer = Vec::new();
    assert_eq!(72, l.write(&mut buffer).unwrap());
    assert_eq!(72, buffer.len());
    assert_eq!(l, LeafRecord::read(&mut Cursor::new(&buffer), 5).unwrap());
    assert!(LeafRecord::read(&mut Cursor::new(&buffer[..71]), 5).is_err());
  }

  #[test]
  fn tree_meta_layout() {
    let m = meta(10);
    let mut buffer = Vec::new();
    assert_eq!(50, m.write(&mut buffer).unwrap());
    assert_eq!(m, TreeMeta::read(&mut Cursor::new(&buffer), m.tree_id).unwrap());

    buffer[48] = 9;
    assert!(TreeMeta::read(&mut Cursor::new(&buffer), m.tree_id).is_err());
  }

  #[test]
  fn publication_layout() {
    let p = Publication { published_at: now(), receipt: Receipt("0xabc".to_string()) };
    let mut buffer = Vec::new();
    assert_eq!(9, p.write(&mut buffer).unwrap());
    assert_eq!(p, Publication::read(&mut Cursor::new(&buffer), p.published_at).unwrap());
  }
}
