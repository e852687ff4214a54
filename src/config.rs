use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest::HashAlgorithm;
use crate::error::Result;
use crate::store::{MemoryStore, RocksDbStore, Store};

/// Engine settings, typically read from a TOML file:
///
/// ```toml
/// hash = "keccak256"
///
/// [store]
/// path = "/var/lib/predictree"
/// create_if_missing = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
  /// Hash function for newly committed trees. Existing trees keep the one they were built with.
  pub hash: HashAlgorithm,
  pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
  /// RocksDB directory. Without one the engine keeps trees in memory.
  pub path: Option<PathBuf>,
  pub create_if_missing: bool,
  pub max_open_files: Option<i32>,
}

impl Default for StoreConfig {
  fn default() -> Self {
    StoreConfig { path: None, create_if_missing: true, max_open_files: None }
  }
}

impl EngineConfig {
  pub fn from_toml_str(s: &str) -> Result<Self> {
    Ok(toml::from_str(s)?)
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
    let content = fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }
}

impl StoreConfig {
  /// Opens the configured backend.
  pub fn open(&self) -> Result<Box<dyn Store>> {
    match &self.path {
      Some(path) => Ok(Box::new(RocksDbStore::open_with_config(path, self)?)),
      None => Ok(Box::new(MemoryStore::new())),
    }
  }
}
