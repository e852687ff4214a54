use crate::digest::{Digest, HashAlgorithm};
use crate::error::Result;
use crate::leaf::{Salt, leaf_digest};
use crate::types::TreeId;

/// Position of a sibling relative to the running hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
  Left,
  Right,
}

impl Side {
  /// Side of the sibling of the node at `index` within its layer.
  #[inline]
  pub fn of(index: u64) -> Side {
    if index % 2 == 0 { Side::Right } else { Side::Left }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sibling {
  pub digest: Digest,
  pub side: Side,
}

/// Inclusion proof for one leaf. Regenerated from the store on every request, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
  pub tree_id: TreeId,
  pub algorithm: HashAlgorithm,
  pub index: u64,
  pub leaf: Digest,
  pub root: Digest,
  pub siblings: Vec<Sibling>,
}

impl Proof {
  /// Sibling digests in fold order, as the ledger-side verifier takes them.
  pub fn digests(&self) -> Vec<Digest> {
    self.siblings.iter().map(|s| s.digest).collect()
  }

  /// Checks the proof against the root it carries.
  pub fn verify(&self) -> bool {
    self.verify_against(&self.root)
  }

  pub fn verify_against(&self, root: &Digest) -> bool {
    verify_path(self.algorithm, &self.leaf, self.index, &self.siblings, root)
  }
}

/// Recomputes the root from a leaf digest: at each level the sibling goes on the right when
/// the running index is even and on the left when it is odd, then the index halves.
///
/// This is the exact computation the ledger's `verify leaf` entry point performs.
pub fn fold(algorithm: HashAlgorithm, leaf: &Digest, index: u64, siblings: &[Digest]) -> Digest {
  let mut running = *leaf;
  let mut i = index;
  for sibling in siblings {
    running = match Side::of(i) {
      Side::Right => algorithm.combine(&running, sibling),
      Side::Left => algorithm.combine(sibling, &running),
    };
    i /= 2;
  }
  running
}

/// Whether `leaf` at `index` is committed under `root`.
///
/// An index that does not fit in `siblings.len()` levels is rejected; otherwise a leaf could
/// be claimed at `index + k * 2^depth` for any `k`.
pub fn verify(algorithm: HashAlgorithm, leaf: &Digest, index: u64, siblings: &[Digest], root: &Digest) -> bool {
  if siblings.len() < u64::BITS as usize && index >> siblings.len() != 0 {
    return false;
  }
  fold(algorithm, leaf, index, siblings) == *root
}

/// Tagged variant of [`verify`]. Every tag must agree with the index parity at its level, so a
/// flipped tag fails even where the sibling equals the running hash.
pub fn verify_path(algorithm: HashAlgorithm, leaf: &Digest, index: u64, path: &[Sibling], root: &Digest) -> bool {
  let mut i = index;
  for sibling in path {
    if sibling.side != Side::of(i) {
      return false;
    }
    i /= 2;
  }
  let digests = path.iter().map(|s| s.digest).collect::<Vec<_>>();
  verify(algorithm, leaf, index, &digests, root)
}

/// Verifies from the raw prediction instead of a cached digest, which also binds the claimed
/// index to the one committed inside the leaf.
pub fn verify_leaf(
  algorithm: HashAlgorithm,
  index: u64,
  value: f64,
  salt: &Salt,
  siblings: &[Digest],
  root: &Digest,
) -> Result<bool> {
  let leaf = leaf_digest(algorithm, index, value, salt)?;
  Ok(verify(algorithm, &leaf, index, siblings, root))
}
