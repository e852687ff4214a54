use crate::digest::{Digest, HashAlgorithm};
use crate::error::{Error, Result};

pub mod proof;

pub use proof::{Proof, Side, Sibling, fold, verify, verify_leaf, verify_path};

/// Number of layers above the leaves, `ceil(log2 n)`. Every proof in a tree of `n` leaves has
/// exactly this many siblings.
pub fn depth(n: u64) -> u32 {
  if n <= 1 { 0 } else { u64::BITS - (n - 1).leading_zeros() }
}

/// Replaces `nodes` with its parent layer. An odd trailing node is paired with itself.
fn reduce(algorithm: HashAlgorithm, nodes: &mut Vec<Digest>) {
  let width = nodes.len();
  let parents = width.div_ceil(2);
  for k in 0..parents {
    let left = nodes[2 * k];
    let right = if 2 * k + 1 < width { nodes[2 * k + 1] } else { left };
    nodes[k] = algorithm.combine(&left, &right);
  }
  nodes.truncate(parents);
}

/// Folds the bottom layer up to the root, handing every layer below the root to `visit` before
/// it is reduced. The root builder and the proof generator both go through here so they can
/// never disagree on pairing.
fn fold_layers<F>(algorithm: HashAlgorithm, mut nodes: Vec<Digest>, mut visit: F) -> Result<Digest>
where
  F: FnMut(&[Digest]),
{
  if nodes.is_empty() {
    return Err(Error::EmptyTree);
  }
  while nodes.len() > 1 {
    visit(&nodes);
    reduce(algorithm, &mut nodes);
  }
  Ok(nodes[0])
}

/// Root digest of the ordered leaf digests.
pub fn root(algorithm: HashAlgorithm, leaves: Vec<Digest>) -> Result<Digest> {
  fold_layers(algorithm, leaves, |_| ())
}

/// Rebuilds the layers from the leaves and collects the sibling of `index` at each of them.
/// Returns the reconstructed root along with the path; nothing but the current layer is held.
pub fn path(algorithm: HashAlgorithm, leaves: Vec<Digest>, index: u64) -> Result<(Digest, Vec<Sibling>)> {
  let leaf_count = leaves.len() as u64;
  if index >= leaf_count {
    return Err(Error::IndexOutOfRange { index, leaf_count });
  }
  let mut siblings = Vec::with_capacity(depth(leaf_count) as usize);
  let mut i = index as usize;
  let root = fold_layers(algorithm, leaves, |layer| {
    let digest = layer.get(i ^ 1).copied().unwrap_or(layer[i]);
    siblings.push(Sibling { digest, side: Side::of(i as u64) });
    i /= 2;
  })?;
  Ok((root, siblings))
}
