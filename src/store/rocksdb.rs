use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ::rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::digest::{DIGEST_SIZE, Digest};
use crate::error::{Error, Result};
use crate::leaf::{LeafRecord, SALT_SIZE};
use crate::store::{Record, Store, read_timestamp, validate_batch};
use crate::types::{Publication, TreeId, TreeMeta};

/// `tree_id -> root ‖ leaf_count ‖ created_at ‖ encoding ‖ algorithm`
const CF_TREES: &str = "trees";

/// `tree_id ‖ index -> value ‖ salt ‖ digest`
const CF_LEAVES: &str = "leaves";

/// `tree_id ‖ published_at -> receipt`
const CF_PUBLICATIONS: &str = "publications";

const TREE_ID_SIZE: usize = 16;

/// Persistent store on RocksDB.
///
/// Keys are big-endian so a forward scan over one tree's prefix returns leaves in index order.
/// A tree and its leaves are written with a single `WriteBatch`; readers never observe a
/// partially written tree.
pub struct RocksDbStore {
  db: DB,
  path: PathBuf,
  // serializes the existence check with the batch write
  writer: Mutex<()>,
}

impl RocksDbStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    Self::open_with_config(path, &StoreConfig::default())
  }

  pub fn open_with_config<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Self> {
    let mut opts = Options::default();
    opts.create_if_missing(config.create_if_missing);
    opts.create_missing_column_families(config.create_if_missing);
    if let Some(max_open_files) = config.max_open_files {
      opts.set_max_open_files(max_open_files);
    }
    let families = [CF_TREES, CF_LEAVES, CF_PUBLICATIONS]
      .into_iter()
      .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
    let db = DB::open_cf_descriptors(&opts, path.as_ref(), families)?;
    debug!(path = %path.as_ref().display(), "rocksdb store opened");
    Ok(RocksDbStore { db, path: path.as_ref().to_path_buf(), writer: Mutex::new(()) })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn flush(&self) -> Result<()> {
    for name in [CF_TREES, CF_LEAVES, CF_PUBLICATIONS] {
      self.db.flush_cf(self.cf(name)?)?;
    }
    Ok(())
  }

  fn cf(&self, name: &str) -> Result<&ColumnFamily> {
    self.db.cf_handle(name).ok_or_else(|| Error::InvalidRecord(format!("missing column family: {name}")))
  }

  fn exists(&self, tree_id: &TreeId) -> Result<bool> {
    Ok(self.db.get_pinned_cf(self.cf(CF_TREES)?, tree_id.as_bytes())?.is_some())
  }

  /// Visits every `(suffix, value)` under the tree's prefix in key order.
  fn scan<F>(&self, cf: &str, tree_id: &TreeId, mut f: F) -> Result<()>
  where
    F: FnMut(&[u8], &[u8]) -> Result<()>,
  {
    let prefix = tree_id.as_bytes();
    let iter = self.db.iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
    for item in iter {
      let (key, value) = item?;
      if !key.starts_with(prefix) {
        break;
      }
      f(&key[TREE_ID_SIZE..], &value)?;
    }
    Ok(())
  }

  fn leaf_index(suffix: &[u8]) -> Result<u64> {
    if suffix.len() != 8 {
      return Err(Error::InvalidRecord(format!("leaf key suffix must be 8 bytes, got {}", suffix.len())));
    }
    Ok(BigEndian::read_u64(suffix))
  }

  /// Leaves come back in key order, so the n-th row scanned must hold index n.
  fn expect_index(tree_id: &TreeId, suffix: &[u8], position: usize) -> Result<u64> {
    let index = Self::leaf_index(suffix)?;
    if index != position as u64 {
      return Err(Error::InvalidRecord(format!("tree {tree_id} has leaf {index} where leaf {position} belongs")));
    }
    Ok(index)
  }
}

fn leaf_key(tree_id: &TreeId, index: u64) -> [u8; TREE_ID_SIZE + 8] {
  let mut key = [0u8; TREE_ID_SIZE + 8];
  key[..TREE_ID_SIZE].copy_from_slice(tree_id.as_bytes());
  BigEndian::write_u64(&mut key[TREE_ID_SIZE..], index);
  key
}

fn publication_key(tree_id: &TreeId, published_at: &DateTime<Utc>) -> [u8; TREE_ID_SIZE + 8] {
  let mut key = [0u8; TREE_ID_SIZE + 8];
  key[..TREE_ID_SIZE].copy_from_slice(tree_id.as_bytes());
  BigEndian::write_i64(&mut key[TREE_ID_SIZE..], published_at.timestamp_millis());
  key
}

impl Store for RocksDbStore {
  fn create_tree(&self, meta: &TreeMeta, leaves: &[LeafRecord]) -> Result<()> {
    validate_batch(meta, leaves)?;
    let trees = self.cf(CF_TREES)?;
    let cf_leaves = self.cf(CF_LEAVES)?;

    let mut batch = WriteBatch::default();
    let mut buffer = Vec::with_capacity(8 + SALT_SIZE + DIGEST_SIZE);
    meta.write(&mut buffer)?;
    batch.put_cf(trees, meta.tree_id.as_bytes(), &buffer);
    for leaf in leaves {
      buffer.clear();
      leaf.write(&mut buffer)?;
      batch.put_cf(cf_leaves, leaf_key(&meta.tree_id, leaf.index), &buffer);
    }

    let _guard = self.writer.lock()?;
    if self.exists(&meta.tree_id)? {
      return Err(Error::TreeConflict(meta.tree_id));
    }
    self.db.write(batch)?;
    trace!(tree_id = %meta.tree_id, leaves = leaves.len(), "tree batch written");
    Ok(())
  }

  fn tree(&self, tree_id: &TreeId) -> Result<TreeMeta> {
    match self.db.get_pinned_cf(self.cf(CF_TREES)?, tree_id.as_bytes())? {
      Some(value) => TreeMeta::read(&mut Cursor::new(&value[..]), *tree_id),
      None => Err(Error::TreeNotFound(*tree_id)),
    }
  }

  fn tree_ids(&self) -> Result<Vec<TreeId>> {
    let mut ids = Vec::new();
    for item in self.db.iterator_cf(self.cf(CF_TREES)?, IteratorMode::Start) {
      let (key, _) = item?;
      ids.push(TreeId::from_slice(&key)?);
    }
    Ok(ids)
  }

  fn leaf(&self, tree_id: &TreeId, index: u64) -> Result<LeafRecord> {
    match self.db.get_pinned_cf(self.cf(CF_LEAVES)?, leaf_key(tree_id, index))? {
      Some(value) => LeafRecord::read(&mut Cursor::new(&value[..]), index),
      None if self.exists(tree_id)? => Err(Error::LeafNotFound { tree_id: *tree_id, index }),
      None => Err(Error::TreeNotFound(*tree_id)),
    }
  }

  fn leaves(&self, tree_id: &TreeId) -> Result<Vec<LeafRecord>> {
    let meta = self.tree(tree_id)?;
    let mut leaves = Vec::with_capacity(meta.leaf_count as usize);
    self.scan(CF_LEAVES, tree_id, |suffix, value| {
      let index = Self::expect_index(tree_id, suffix, leaves.len())?;
      leaves.push(LeafRecord::read(&mut Cursor::new(value), index)?);
      Ok(())
    })?;
    Ok(leaves)
  }

  fn leaf_digests(&self, tree_id: &TreeId) -> Result<Vec<Digest>> {
    let meta = self.tree(tree_id)?;
    let mut digests = Vec::with_capacity(meta.leaf_count as usize);
    self.scan(CF_LEAVES, tree_id, |suffix, value| {
      Self::expect_index(tree_id, suffix, digests.len())?;
      let offset = 8 + SALT_SIZE;
      let digest = value
        .get(offset..offset + DIGEST_SIZE)
        .ok_or_else(|| Error::InvalidRecord(format!("truncated leaf record in tree {tree_id}")))?;
      digests.push(Digest::from_slice(digest)?);
      Ok(())
    })?;
    Ok(digests)
  }

  fn record_publication(&self, tree_id: &TreeId, publication: &Publication) -> Result<()> {
    let cf = self.cf(CF_PUBLICATIONS)?;
    let key = publication_key(tree_id, &publication.published_at);
    let mut buffer = Vec::new();
    publication.write(&mut buffer)?;

    let _guard = self.writer.lock()?;
    if !self.exists(tree_id)? {
      return Err(Error::TreeNotFound(*tree_id));
    }
    if self.db.get_pinned_cf(cf, key)?.is_some() {
      return Err(Error::PublicationConflict {
        tree_id: *tree_id,
        published_at: publication.published_at.timestamp_millis(),
      });
    }
    self.db.put_cf(cf, key, &buffer)?;
    Ok(())
  }

  fn has_publication(&self, tree_id: &TreeId, published_at: &DateTime<Utc>) -> Result<bool> {
    if !self.exists(tree_id)? {
      return Err(Error::TreeNotFound(*tree_id));
    }
    let key = publication_key(tree_id, published_at);
    Ok(self.db.get_pinned_cf(self.cf(CF_PUBLICATIONS)?, key)?.is_some())
  }

  fn publications(&self, tree_id: &TreeId) -> Result<Vec<Publication>> {
    if !self.exists(tree_id)? {
      return Err(Error::TreeNotFound(*tree_id));
    }
    let mut publications = Vec::new();
    self.scan(CF_PUBLICATIONS, tree_id, |suffix, value| {
      if suffix.len() != 8 {
        return Err(Error::InvalidRecord(format!("publication key suffix must be 8 bytes, got {}", suffix.len())));
      }
      let published_at = read_timestamp(BigEndian::read_i64(suffix))?;
      publications.push(Publication::read(&mut Cursor::new(value), published_at)?);
      Ok(())
    })?;
    Ok(publications)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::thread;

  use tempfile::TempDir;

  use super::*;
  use crate::store::testing::{fixture, publication};

  fn open() -> (TempDir, RocksDbStore) {
    let dir = tempfile::Builder::new().prefix(".tmp-predictree-rocksdb").tempdir().unwrap();
    let store = RocksDbStore::open(dir.path()).unwrap();
    (dir, store)
  }

  #[test]
  fn create_and_read() {
    let (_dir, store) = open();
    let (meta, leaves) = fixture(7);
    store.create_tree(&meta, &leaves).unwrap();

    assert_eq!(meta, store.tree(&meta.tree_id).unwrap());
    assert_eq!(leaves, store.leaves(&meta.tree_id).unwrap());
    assert_eq!(leaves.iter().map(|l| l.digest).collect::<Vec<_>>(), store.leaf_digests(&meta.tree_id).unwrap());
    for leaf in leaves.iter() {
      assert_eq!(*leaf, store.leaf(&meta.tree_id, leaf.index).unwrap());
    }
  }

  #[test]
  fn leaves_of_neighbouring_trees_do_not_mix() {
    let (_dir, store) = open();
    let (a, leaves_a) = fixture(3);
    let (b, leaves_b) = fixture(300);
    store.create_tree(&a, &leaves_a).unwrap();
    store.create_tree(&b, &leaves_b).unwrap();
    assert_eq!(3, store.leaf_digests(&a.tree_id).unwrap().len());
    assert_eq!(leaves_b, store.leaves(&b.tree_id).unwrap());

    let mut ids = vec![a.tree_id, b.tree_id];
    ids.sort();
    assert_eq!(ids, store.tree_ids().unwrap());
  }

  #[test]
  fn index_order_survives_byte_order() {
    // 256 sorts before 1 if the index were little-endian
    let (_dir, store) = open();
    let (meta, leaves) = fixture(260);
    store.create_tree(&meta, &leaves).unwrap();
    let indices = store.leaves(&meta.tree_id).unwrap().iter().map(|l| l.index).collect::<Vec<_>>();
    assert_eq!((0..260).collect::<Vec<_>>(), indices);
  }

  #[test]
  fn not_found_and_conflict() {
    let (_dir, store) = open();
    let unknown = TreeId::new();
    assert!(matches!(store.tree(&unknown), Err(Error::TreeNotFound(_))));
    assert!(matches!(store.leaf(&unknown, 0), Err(Error::TreeNotFound(_))));
    assert!(matches!(store.leaf_digests(&unknown), Err(Error::TreeNotFound(_))));
    assert!(matches!(store.publications(&unknown), Err(Error::TreeNotFound(_))));

    let (meta, leaves) = fixture(2);
    store.create_tree(&meta, &leaves).unwrap();
    assert!(matches!(store.leaf(&meta.tree_id, 2), Err(Error::LeafNotFound { index: 2, .. })));
    assert!(matches!(store.create_tree(&meta, &leaves), Err(Error::TreeConflict(_))));

    let (other, mut dup) = fixture(2);
    dup[1].index = 0;
    assert!(matches!(store.create_tree(&other, &dup), Err(Error::LeafConflict { index: 0, .. })));
    assert!(store.tree(&other.tree_id).unwrap_err().is_not_found());
  }

  #[test]
  fn missing_leaf_row_is_an_invalid_record() {
    let (_dir, store) = open();
    let (meta, leaves) = fixture(5);
    store.create_tree(&meta, &leaves).unwrap();
    store.db.delete_cf(store.cf(CF_LEAVES).unwrap(), leaf_key(&meta.tree_id, 2)).unwrap();

    assert!(matches!(store.leaves(&meta.tree_id), Err(Error::InvalidRecord(_))));
    assert!(matches!(store.leaf_digests(&meta.tree_id), Err(Error::InvalidRecord(_))));
    assert!(matches!(store.leaf(&meta.tree_id, 2), Err(Error::LeafNotFound { index: 2, .. })));

    let engine = crate::engine::Engine::new(store);
    assert!(matches!(engine.proof(&meta.tree_id, 0), Err(Error::CorruptTree { .. })));
    assert!(matches!(engine.proof(&meta.tree_id, 0), Err(Error::Quarantined(_))));
  }

  #[test]
  fn persistence() {
    let dir = tempfile::Builder::new().prefix(".tmp-predictree-rocksdb").tempdir().unwrap();
    let (meta, leaves) = fixture(5);
    let p = publication(1_700_000_000, "0xfeed");
    {
      let store = RocksDbStore::open(dir.path()).unwrap();
      store.create_tree(&meta, &leaves).unwrap();
      store.record_publication(&meta.tree_id, &p).unwrap();
      store.flush().unwrap();
    }
    {
      let store = RocksDbStore::open(dir.path()).unwrap();
      assert_eq!(meta, store.tree(&meta.tree_id).unwrap());
      assert_eq!(leaves, store.leaves(&meta.tree_id).unwrap());
      assert_eq!(vec![p], store.publications(&meta.tree_id).unwrap());
    }
  }

  #[test]
  fn missing_database_without_create() {
    let dir = tempfile::Builder::new().prefix(".tmp-predictree-rocksdb").tempdir().unwrap();
    let config = StoreConfig { create_if_missing: false, ..StoreConfig::default() };
    assert!(RocksDbStore::open_with_config(dir.path().join("absent"), &config).is_err());
  }

  #[test]
  fn publications_in_time_order() {
    let (_dir, store) = open();
    let (meta, leaves) = fixture(1);
    store.create_tree(&meta, &leaves).unwrap();
    let ps = [publication(30, "0x03"), publication(10, "0x01"), publication(20, "0x02")];
    for p in ps.iter() {
      store.record_publication(&meta.tree_id, p).unwrap();
    }
    let got = store.publications(&meta.tree_id).unwrap();
    assert_eq!(vec!["0x01", "0x02", "0x03"], got.iter().map(|p| p.receipt.0.as_str()).collect::<Vec<_>>());
    assert!(store.record_publication(&meta.tree_id, &ps[0]).unwrap_err().is_conflict());
    assert!(store.has_publication(&meta.tree_id, &ps[1].published_at).unwrap());
    assert!(!store.has_publication(&meta.tree_id, &publication(15, "0x").published_at).unwrap());
    assert!(store.has_publication(&TreeId::new(), &ps[1].published_at).unwrap_err().is_not_found());
  }

  #[test]
  fn concurrent_creation_of_the_same_tree() {
    let (_dir, store) = open();
    let store = Arc::new(store);
    let (meta, leaves) = fixture(64);
    let handles = (0..8)
      .map(|_| {
        let store = store.clone();
        let meta = meta.clone();
        let leaves = leaves.clone();
        thread::spawn(move || store.create_tree(&meta, &leaves))
      })
      .collect::<Vec<_>>();
    let results = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
    assert_eq!(1, results.iter().filter(|r| r.is_ok()).count());
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| e.is_conflict()));
    assert_eq!(leaves, store.leaves(&meta.tree_id).unwrap());
  }
}
