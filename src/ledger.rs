use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::digest::{Digest, HashAlgorithm};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::hashtree::fold;
use crate::store::Store;
use crate::types::{Publication, Receipt, TreeId};

/// Boundary to the ledger that holds published roots.
///
/// The remote side keys roots by the submission timestamp and verifies a leaf by running the
/// index-parity fold against the root stored under that timestamp.
pub trait Ledger {
  /// Submits `root` under `timestamp` and returns the transaction identifier.
  fn set_root(&self, timestamp: u64, root: &Digest) -> Result<Receipt>;

  fn verify_leaf(&self, timestamp: u64, leaf: &Digest, index: u64, siblings: &[Digest]) -> Result<bool>;
}

/// In-process ledger that stores roots and re-executes the verifier exactly as the remote
/// program does. Useful for checking that proofs are accepted verbatim.
pub struct LocalLedger {
  algorithm: HashAlgorithm,
  roots: RwLock<HashMap<u64, Digest>>,
  sequence: AtomicU64,
}

impl LocalLedger {
  pub fn new(algorithm: HashAlgorithm) -> Self {
    LocalLedger { algorithm, roots: RwLock::new(HashMap::new()), sequence: AtomicU64::new(0) }
  }

  pub fn root(&self, timestamp: u64) -> Result<Option<Digest>> {
    Ok(self.roots.read()?.get(&timestamp).copied())
  }

  /// Number of `set_root` transactions submitted so far.
  pub fn submissions(&self) -> u64 {
    self.sequence.load(Ordering::SeqCst)
  }
}

impl Default for LocalLedger {
  fn default() -> Self {
    Self::new(HashAlgorithm::default())
  }
}

impl Ledger for LocalLedger {
  fn set_root(&self, timestamp: u64, root: &Digest) -> Result<Receipt> {
    self.roots.write()?.insert(timestamp, *root);
    let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
    let tx = self.algorithm.hash(&[&timestamp.to_be_bytes(), root.as_bytes(), &sequence.to_be_bytes()]);
    Ok(Receipt(tx.to_hex()))
  }

  fn verify_leaf(&self, timestamp: u64, leaf: &Digest, index: u64, siblings: &[Digest]) -> Result<bool> {
    // an unset slot reads as the zero word on the remote side
    let root = self.root(timestamp)?.unwrap_or_default();
    Ok(fold(self.algorithm, leaf, index, siblings) == root)
  }
}

impl<S: Store> Engine<S> {
  /// Publishes the stored root of `tree_id` under `at` (whole seconds) and records the
  /// publication. The same root may be published again at a different time.
  ///
  /// A publication already recorded for that second is a conflict and nothing is submitted.
  /// Once the ledger has accepted the root, a failure to record it is reported as
  /// [`Error::Ledger`] carrying the receipt.
  pub fn publish<L: Ledger + ?Sized>(&self, ledger: &L, tree_id: &TreeId, at: DateTime<Utc>) -> Result<Publication> {
    let meta = self.tree(tree_id)?;
    let timestamp = u64::try_from(at.timestamp())
      .map_err(|_| Error::Ledger(format!("cannot publish at a time before the epoch: {at}")))?;
    let published_at = DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at);
    if self.store().has_publication(tree_id, &published_at)? {
      return Err(Error::PublicationConflict { tree_id: *tree_id, published_at: published_at.timestamp_millis() });
    }

    let receipt = ledger.set_root(timestamp, &meta.root)?;
    let publication = Publication { published_at, receipt };
    if let Err(err) = self.store().record_publication(tree_id, &publication) {
      error!(tree_id = %tree_id, timestamp, receipt = %publication.receipt, %err, "root published but not recorded");
      return Err(Error::Ledger(format!("root submitted as {} but not recorded: {err}", publication.receipt)));
    }
    info!(tree_id = %tree_id, timestamp, root = %meta.root, receipt = %publication.receipt, "root published");
    Ok(publication)
  }
}
