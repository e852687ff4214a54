use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::leaf::LeafRecord;
use crate::store::{Store, validate_batch};
use crate::types::{Publication, TreeId, TreeMeta};

struct Entry {
  meta: TreeMeta,
  leaves: Vec<LeafRecord>,
  publications: BTreeMap<DateTime<Utc>, Publication>,
}

/// Process-local store. Clones share the same trees.
#[derive(Clone, Default)]
pub struct MemoryStore {
  trees: Arc<RwLock<HashMap<TreeId, Entry>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_entry<T, F>(&self, tree_id: &TreeId, f: F) -> Result<T>
  where
    F: FnOnce(&Entry) -> Result<T>,
  {
    let trees = self.trees.read()?;
    trees.get(tree_id).ok_or(Error::TreeNotFound(*tree_id)).and_then(f)
  }

  /// Overwrites the stored digest of one leaf, bypassing every check. Test hook for
  /// corruption handling.
  #[cfg(test)]
  pub(crate) fn tamper_digest(&self, tree_id: &TreeId, index: u64, digest: Digest) {
    let mut trees = self.trees.write().unwrap();
    trees.get_mut(tree_id).unwrap().leaves[index as usize].digest = digest;
  }

  #[cfg(test)]
  pub(crate) fn tamper_value(&self, tree_id: &TreeId, index: u64, value: f64) {
    let mut trees = self.trees.write().unwrap();
    trees.get_mut(tree_id).unwrap().leaves[index as usize].value = value;
  }
}

impl Store for MemoryStore {
  fn create_tree(&self, meta: &TreeMeta, leaves: &[LeafRecord]) -> Result<()> {
    validate_batch(meta, leaves)?;
    let mut sorted = leaves.to_vec();
    sorted.sort_by_key(|leaf| leaf.index);

    let mut trees = self.trees.write()?;
    if trees.contains_key(&meta.tree_id) {
      return Err(Error::TreeConflict(meta.tree_id));
    }
    let entry = Entry { meta: meta.clone(), leaves: sorted, publications: BTreeMap::new() };
    trees.insert(meta.tree_id, entry);
    trace!(tree_id = %meta.tree_id, leaves = leaves.len(), "tree stored in memory");
    Ok(())
  }

  fn tree(&self, tree_id: &TreeId) -> Result<TreeMeta> {
    self.with_entry(tree_id, |e| Ok(e.meta.clone()))
  }

  fn tree_ids(&self) -> Result<Vec<TreeId>> {
    let trees = self.trees.read()?;
    let mut ids = trees.keys().copied().collect::<Vec<_>>();
    ids.sort_unstable();
    Ok(ids)
  }

  fn leaf(&self, tree_id: &TreeId, index: u64) -> Result<LeafRecord> {
    self.with_entry(tree_id, |e| {
      e.leaves.get(index as usize).cloned().ok_or(Error::LeafNotFound { tree_id: *tree_id, index })
    })
  }

  fn leaves(&self, tree_id: &TreeId) -> Result<Vec<LeafRecord>> {
    self.with_entry(tree_id, |e| Ok(e.leaves.clone()))
  }

  fn leaf_digests(&self, tree_id: &TreeId) -> Result<Vec<Digest>> {
    self.with_entry(tree_id, |e| Ok(e.leaves.iter().map(|leaf| leaf.digest).collect()))
  }

  fn record_publication(&self, tree_id: &TreeId, publication: &Publication) -> Result<()> {
    let mut trees = self.trees.write()?;
    let entry = trees.get_mut(tree_id).ok_or(Error::TreeNotFound(*tree_id))?;
    if entry.publications.contains_key(&publication.published_at) {
      return Err(Error::PublicationConflict {
        tree_id: *tree_id,
        published_at: publication.published_at.timestamp_millis(),
      });
    }
    entry.publications.insert(publication.published_at, publication.clone());
    Ok(())
  }

  fn publications(&self, tree_id: &TreeId) -> Result<Vec<Publication>> {
    self.with_entry(tree_id, |e| Ok(e.publications.values().cloned().collect()))
  }

  fn has_publication(&self, tree_id: &TreeId, published_at: &DateTime<Utc>) -> Result<bool> {
    self.with_entry(tree_id, |e| Ok(e.publications.contains_key(published_at)))
  }
}
