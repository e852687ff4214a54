use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::Digest as _;

use crate::error::{Error, Result};

pub const DIGEST_SIZE: usize = 32;

/// A 32-byte leaf or node hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
  pub const fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
    Digest(bytes)
  }

  pub fn from_slice(bytes: &[u8]) -> Result<Self> {
    let bytes: [u8; DIGEST_SIZE] = bytes
      .try_into()
      .map_err(|_| Error::InvalidRecord(format!("digest must be {DIGEST_SIZE} bytes, got {}", bytes.len())))?;
    Ok(Digest(bytes))
  }

  pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    format!("0x{}", hex::encode(self.0))
  }
}

impl From<[u8; DIGEST_SIZE]> for Digest {
  fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
    Digest(bytes)
  }
}

impl From<blake3::Hash> for Digest {
  fn from(hash: blake3::Hash) -> Self {
    Digest(*hash.as_bytes())
  }
}

impl AsRef<[u8]> for Digest {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl Debug for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Digest({})", self.to_hex())
  }
}

impl FromStr for Digest {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| Error::InvalidRecord(format!("digest hex: {e}")))?;
    Digest::from_slice(&bytes)
  }
}

/// Hash function a tree is committed with. Stored on the tree metadata so proofs and
/// verification always use the algorithm the root was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
  /// What an EVM ledger recomputes with `keccak256(abi.encodePacked(..))`.
  #[default]
  Keccak256,
  Blake3,
}

impl HashAlgorithm {
  /// Hash the concatenation of `parts`.
  pub fn hash(self, parts: &[&[u8]]) -> Digest {
    match self {
      HashAlgorithm::Keccak256 => {
        let mut hasher = sha3::Keccak256::new();
        for part in parts {
          hasher.update(part);
        }
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&hasher.finalize());
        Digest(out)
      }
      HashAlgorithm::Blake3 => {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
          hasher.update(part);
        }
        Digest::from(hasher.finalize())
      }
    }
  }

  /// Parent digest `Hash(left ‖ right)`.
  #[inline]
  pub fn combine(self, left: &Digest, right: &Digest) -> Digest {
    self.hash(&[left.as_bytes(), right.as_bytes()])
  }

  pub(crate) fn tag(self) -> u8 {
    match self {
      HashAlgorithm::Keccak256 => 1,
      HashAlgorithm::Blake3 => 2,
    }
  }

  pub(crate) fn from_tag(tag: u8) -> Result<Self> {
    match tag {
      1 => Ok(HashAlgorithm::Keccak256),
      2 => Ok(HashAlgorithm::Blake3),
      _ => Err(Error::InvalidRecord(format!("unknown hash algorithm tag: {tag}"))),
    }
  }
}

impl Display for HashAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HashAlgorithm::Keccak256 => f.write_str("keccak256"),
      HashAlgorithm::Blake3 => f.write_str("blake3"),
    }
  }
}
