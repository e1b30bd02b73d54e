//! Snapshots: the filesystem and metadata at one point of a build plan.
//!
//! A [`Snapshot`] is produced by the stage executor for every step and is
//! never mutated afterwards; the next stage receives a copy-on-write clone.
//! [`SnapshotRecord`] is its serializable form, with file contents replaced
//! by digests, and is what identifies a snapshot.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::filesystem::Filesystem;
use crate::util::hash::{ContentHash, HashError, Hashable};

/// Working directory of a fresh snapshot.
pub const ROOT_DIR: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub filesystem: Filesystem,
  pub work_dir: String,
  pub exposed_ports: BTreeSet<u16>,
  pub entrypoint: Option<Vec<String>>,
  pub env: BTreeMap<String, String>,
}

impl Default for Snapshot {
  fn default() -> Self {
    Self::from_base(Filesystem::new())
  }
}

impl Snapshot {
  /// A snapshot with no files, rooted at `/`.
  pub fn empty() -> Self {
    Self::default()
  }

  /// A snapshot holding a base image's filesystem and default metadata.
  pub fn from_base(filesystem: Filesystem) -> Self {
    Self {
      filesystem,
      work_dir: ROOT_DIR.to_string(),
      exposed_ports: BTreeSet::new(),
      entrypoint: None,
      env: BTreeMap::new(),
    }
  }

  pub fn record(&self) -> SnapshotRecord {
    SnapshotRecord {
      files: self.filesystem.file_table(),
      work_dir: self.work_dir.clone(),
      exposed_ports: self.exposed_ports.clone(),
      entrypoint: self.entrypoint.clone(),
      env: self.env.clone(),
    }
  }

  pub fn digest(&self) -> Result<ContentHash, HashError> {
    self.record().content_hash()
  }
}

/// Serializable description of a snapshot, with contents replaced by digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
  pub files: BTreeMap<String, ContentHash>,
  pub work_dir: String,
  pub exposed_ports: BTreeSet<u16>,
  pub entrypoint: Option<Vec<String>>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl Hashable for SnapshotRecord {}
