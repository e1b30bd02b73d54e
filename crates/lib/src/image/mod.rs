//! Built images: the manifest a build produces and the local tag index.

mod index;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use index::*;

use crate::cache::CacheKey;
use crate::snapshot::Snapshot;
use crate::util::hash::{ContentHash, HashError, Hashable, ObjectHash};

pub const MANIFEST_VERSION: u32 = 1;

/// Everything needed to launch a built image and to find its layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
  pub version: u32,
  /// Cache keys of every layer, in plan order. The last one holds the
  /// final filesystem.
  pub layers: Vec<CacheKey>,
  /// Digest of the final snapshot.
  pub snapshot: ContentHash,
  pub exposed_ports: BTreeSet<u16>,
  pub entrypoint: Option<Vec<String>>,
  pub work_dir: String,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl Hashable for ImageManifest {}

impl ImageManifest {
  pub fn new(layers: Vec<CacheKey>, snapshot: &Snapshot) -> Result<Self, HashError> {
    Ok(Self {
      version: MANIFEST_VERSION,
      layers,
      snapshot: snapshot.digest()?,
      exposed_ports: snapshot.exposed_ports.clone(),
      entrypoint: snapshot.entrypoint.clone(),
      work_dir: snapshot.work_dir.clone(),
      env: snapshot.env.clone(),
    })
  }

  /// Image identifier: truncated hash of the manifest.
  pub fn id(&self) -> Result<ObjectHash, HashError> {
    self.compute_hash()
  }

  /// Key of the layer holding the final filesystem.
  pub fn top_layer(&self) -> Option<&CacheKey> {
    self.layers.last()
  }
}
