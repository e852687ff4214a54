use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;

use crate::digest::{Digest, HashAlgorithm};
use crate::error::{Error, Result};

pub const SALT_SIZE: usize = 32;

/// `index: u64 BE ‖ value: f64 BE`
pub const ENCODED_SIZE: usize = 8 + 8;

pub type Salt = [u8; SALT_SIZE];

/// Byte layout of `Encode(index, value)`. Persisted with every tree: a tree can only be
/// re-verified by an engine that speaks the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncodingVersion {
  #[default]
  V1,
}

impl EncodingVersion {
  pub(crate) fn tag(self) -> u8 {
    match self {
      EncodingVersion::V1 => 1,
    }
  }

  pub(crate) fn from_tag(tag: u8) -> Result<Self> {
    match tag {
      1 => Ok(EncodingVersion::V1),
      _ => Err(Error::InvalidRecord(format!("unsupported leaf encoding version: {tag}"))),
    }
  }
}

/// Fixed-width canonical encoding of one prediction.
///
/// Non-finite values have no canonical form and are rejected; `-0.0` is written as `+0.0`
/// so numerically equal predictions encode identically.
pub fn encode(index: u64, value: f64) -> Result<[u8; ENCODED_SIZE]> {
  if value.is_nan() {
    return Err(Error::Encoding { index, value, reason: "NaN has no canonical encoding" });
  }
  if value.is_infinite() {
    return Err(Error::Encoding { index, value, reason: "infinite values have no canonical encoding" });
  }
  let value = if value == 0.0 { 0.0 } else { value };

  let mut buffer = [0u8; ENCODED_SIZE];
  BigEndian::write_u64(&mut buffer[..8], index);
  BigEndian::write_f64(&mut buffer[8..], value);
  Ok(buffer)
}

/// `Hash(Encode(index, value) ‖ salt)`
pub fn leaf_digest(algorithm: HashAlgorithm, index: u64, value: f64, salt: &Salt) -> Result<Digest> {
  let encoded = encode(index, value)?;
  Ok(algorithm.hash(&[&encoded, salt]))
}

/// Draws a fresh salt. Salts are generated once per leaf and persisted; the digest cannot be
/// reproduced without them.
pub fn random_salt<R: RngCore + ?Sized>(rng: &mut R) -> Salt {
  let mut salt = [0u8; SALT_SIZE];
  rng.fill_bytes(&mut salt);
  salt
}

/// One committed prediction as it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafRecord {
  pub index: u64,
  pub value: f64,
  pub salt: Salt,
  pub digest: Digest,
}

impl LeafRecord {
  pub fn new(algorithm: HashAlgorithm, index: u64, value: f64, salt: Salt) -> Result<Self> {
    let digest = leaf_digest(algorithm, index, value, &salt)?;
    Ok(LeafRecord { index, value, salt, digest })
  }

  pub fn recompute(&self, algorithm: HashAlgorithm) -> Result<Digest> {
    leaf_digest(algorithm, self.index, self.value, &self.salt)
  }

  /// Whether the cached digest still matches `(index, value, salt)`.
  pub fn is_consistent(&self, algorithm: HashAlgorithm) -> bool {
    self.recompute(algorithm).map(|d| d == self.digest).unwrap_or(false)
  }
}
