use std::collections::HashSet;
use std::sync::RwLock;

use rand::RngCore;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::digest::{Digest, HashAlgorithm};
use crate::error::{Error, Result};
use crate::hashtree::{self, Proof};
use crate::leaf::{EncodingVersion, LeafRecord, Salt, random_salt};
use crate::store::Store;
use crate::types::{TreeId, TreeMeta, now};

/// Result of recomputing a tree from its persisted leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
  pub tree_id: TreeId,
  pub leaf_count: u64,
  pub stored_root: Digest,
  pub computed_root: Digest,
  /// Leaves whose stored digest differs from `Hash(Encode(index, value) ‖ salt)`.
  pub mismatched_leaves: Vec<u64>,
}

impl AuditReport {
  pub fn is_intact(&self) -> bool {
    self.mismatched_leaves.is_empty() && self.stored_root == self.computed_root
  }
}

/// Commitment engine over an explicit store handle.
///
/// Commits write each tree once; proofs are rebuilt from the stored leaf digests on every
/// request. Every method takes `&self`, so one engine can serve any number of threads.
pub struct Engine<S: Store> {
  store: S,
  algorithm: HashAlgorithm,
  quarantine: RwLock<HashSet<TreeId>>,
}

impl Engine<Box<dyn Store>> {
  pub fn from_config(config: &EngineConfig) -> Result<Self> {
    let store = config.store.open()?;
    Ok(Engine::with_algorithm(store, config.hash))
  }
}

impl<S: Store> Engine<S> {
  pub fn new(store: S) -> Self {
    Self::with_algorithm(store, HashAlgorithm::default())
  }

  pub fn with_algorithm(store: S, algorithm: HashAlgorithm) -> Self {
    Engine { store, algorithm, quarantine: RwLock::new(HashSet::new()) }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Hash function used for new commits.
  pub fn algorithm(&self) -> HashAlgorithm {
    self.algorithm
  }

  /// Commits `values` as a new tree, leaf `i` holding `values[i]` under a fresh random salt.
  pub fn commit(&self, values: &[f64]) -> Result<TreeMeta> {
    self.commit_with_rng(values, &mut rand::rng())
  }

  pub fn commit_with_rng<R: RngCore + ?Sized>(&self, values: &[f64], rng: &mut R) -> Result<TreeMeta> {
    let salted = values.iter().map(|value| (*value, random_salt(rng))).collect::<Vec<_>>();
    self.commit_with_salts(TreeId::new(), &salted)
  }

  /// Commits under a caller-chosen tree id with caller-supplied salts. A second commit under
  /// the same id fails with a conflict and leaves the first tree untouched.
  pub fn commit_with_salts(&self, tree_id: TreeId, salted: &[(f64, Salt)]) -> Result<TreeMeta> {
    if salted.is_empty() {
      return Err(Error::EmptyTree);
    }
    let leaves = salted
      .iter()
      .enumerate()
      .map(|(i, (value, salt))| LeafRecord::new(self.algorithm, i as u64, *value, *salt))
      .collect::<Result<Vec<_>>>()?;

    let root = hashtree::root(self.algorithm, leaves.iter().map(|leaf| leaf.digest).collect())?;
    let meta = TreeMeta {
      tree_id,
      root,
      leaf_count: leaves.len() as u64,
      created_at: now(),
      encoding: EncodingVersion::V1,
      algorithm: self.algorithm,
    };
    self.store.create_tree(&meta, &leaves)?;
    info!(tree_id = %tree_id, leaves = meta.leaf_count, root = %root, algorithm = %self.algorithm, "tree committed");
    Ok(meta)
  }

  pub fn tree(&self, tree_id: &TreeId) -> Result<TreeMeta> {
    self.store.tree(tree_id)
  }

  /// Generates the inclusion proof of leaf `index` from the stored leaf digests.
  ///
  /// The reconstructed root must equal the stored one. If it does not, the tree is
  /// quarantined and no further proofs are issued for it until [`Engine::release`].
  pub fn proof(&self, tree_id: &TreeId, index: u64) -> Result<Proof> {
    self.ensure_not_quarantined(tree_id)?;
    let meta = self.store.tree(tree_id)?;
    if index >= meta.leaf_count {
      return Err(Error::LeafNotFound { tree_id: *tree_id, index });
    }

    let leaves = self.store.leaf_digests(tree_id).map_err(|e| self.on_invalid_record(tree_id, e))?;
    if leaves.len() as u64 != meta.leaf_count {
      let reason = format!("root commits {} leaves but {} are stored", meta.leaf_count, leaves.len());
      return Err(self.corrupt(tree_id, reason));
    }
    let leaf = leaves[index as usize];
    let (root, siblings) = hashtree::path(meta.algorithm, leaves, index)?;
    if root != meta.root {
      let reason = format!("reconstructed root {root} does not match stored root {}", meta.root);
      return Err(self.corrupt(tree_id, reason));
    }

    debug!(tree_id = %tree_id, index, siblings = siblings.len(), "proof generated");
    Ok(Proof { tree_id: *tree_id, algorithm: meta.algorithm, index, leaf, root, siblings })
  }

  /// Checks `proof` against the root stored for its tree, not the root it carries. The index
  /// must also be one the tree committed; the duplicated last node of an odd layer would
  /// otherwise fold to the root at positions past `leaf_count`.
  pub fn verify(&self, proof: &Proof) -> Result<bool> {
    let meta = self.store.tree(&proof.tree_id)?;
    Ok(proof.index < meta.leaf_count && proof.algorithm == meta.algorithm && proof.verify_against(&meta.root))
  }

  /// End-to-end check of one stored leaf: the stored digest must match its recomputation
  /// from `(index, value, salt)`, and that leaf must prove against the stored root.
  pub fn verify_leaf(&self, tree_id: &TreeId, index: u64) -> Result<bool> {
    let leaf = self.store.leaf(tree_id, index)?;
    let meta = self.store.tree(tree_id)?;
    let recomputed = leaf.recompute(meta.algorithm)?;
    if recomputed != leaf.digest {
      let reason = format!("leaf {index} stores digest {} but its contents hash to {recomputed}", leaf.digest);
      return Err(self.corrupt(tree_id, reason));
    }
    let proof = self.proof(tree_id, index)?;
    hashtree::verify_leaf(meta.algorithm, index, leaf.value, &leaf.salt, &proof.digests(), &meta.root)
  }

  /// Recomputes every leaf digest and the root. A tree that fails the audit is quarantined.
  pub fn audit(&self, tree_id: &TreeId) -> Result<AuditReport> {
    let meta = self.store.tree(tree_id)?;
    let leaves = self.store.leaves(tree_id).map_err(|e| self.on_invalid_record(tree_id, e))?;
    let mut mismatched_leaves = Vec::new();
    let mut digests = Vec::with_capacity(leaves.len());
    for (position, leaf) in leaves.iter().enumerate() {
      let consistent = leaf.index == position as u64 && leaf.is_consistent(meta.algorithm);
      if !consistent {
        mismatched_leaves.push(leaf.index);
      }
      digests.push(leaf.digest);
    }
    let computed_root = if digests.len() as u64 == meta.leaf_count {
      hashtree::root(meta.algorithm, digests)?
    } else {
      Digest::default()
    };

    let report =
      AuditReport { tree_id: *tree_id, leaf_count: meta.leaf_count, stored_root: meta.root, computed_root, mismatched_leaves };
    if report.is_intact() {
      debug!(tree_id = %tree_id, "audit passed");
    } else {
      warn!(tree_id = %tree_id, mismatched = report.mismatched_leaves.len(), "audit failed");
      self.quarantine.write()?.insert(*tree_id);
    }
    Ok(report)
  }

  /// Lifts the quarantine of a tree after investigation. Returns whether it was quarantined.
  pub fn release(&self, tree_id: &TreeId) -> Result<bool> {
    let released = self.quarantine.write()?.remove(tree_id);
    if released {
      info!(tree_id = %tree_id, "tree released from quarantine");
    }
    Ok(released)
  }

  pub fn quarantined(&self) -> Result<Vec<TreeId>> {
    let mut ids = self.quarantine.read()?.iter().copied().collect::<Vec<_>>();
    ids.sort_unstable();
    Ok(ids)
  }

  fn ensure_not_quarantined(&self, tree_id: &TreeId) -> Result<()> {
    if self.quarantine.read()?.contains(tree_id) { Err(Error::Quarantined(*tree_id)) } else { Ok(()) }
  }

  /// A malformed stored row means the tree can no longer be trusted.
  fn on_invalid_record(&self, tree_id: &TreeId, err: Error) -> Error {
    match err {
      Error::InvalidRecord(reason) => self.corrupt(tree_id, reason),
      other => other,
    }
  }

  fn corrupt(&self, tree_id: &TreeId, reason: String) -> Error {
    error!(tree_id = %tree_id, %reason, "corrupt tree, proof issuance halted");
    match self.quarantine.write() {
      Ok(mut quarantine) => {
        quarantine.insert(*tree_id);
      }
      Err(poisoned) => {
        poisoned.into_inner().insert(*tree_id);
      }
    }
    Error::CorruptTree { tree_id: *tree_id, reason }
  }
}
