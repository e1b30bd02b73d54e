//! Persistent layer store backing the layer cache.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── layers/
//! │   └── <cache-key>.json    # StoredLayer: snapshot record for one layer
//! └── blobs/
//!     └── <sha256>            # File contents, shared across layers
//! ```
//!
//! Blobs are written before the layer record that references them, and
//! every file goes through a temp file in the same directory followed by a
//! rename. A layer record on disk therefore always has its blobs present
//! unless something outside the store removed them, in which case loading
//! reports the layer as absent.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::filesystem::{Blob, Filesystem};
use crate::snapshot::{Snapshot, SnapshotRecord};
use crate::util::hash::{ContentHash, hash_bytes};

pub const LAYER_RECORD_VERSION: u32 = 1;

const LAYERS_DIR: &str = "layers";
const BLOBS_DIR: &str = "blobs";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create store directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize layer {key}: {source}")]
  Serialize {
    key: CacheKey,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported layer record version {version} in {path}")]
  UnsupportedVersion { path: PathBuf, version: u32 },

  #[error("layer not found: {0}")]
  NotFound(CacheKey),

  #[error("store task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// One persisted layer: the snapshot a cache key resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLayer {
  pub version: u32,
  pub key: CacheKey,
  pub snapshot: SnapshotRecord,
}

#[derive(Debug, Clone)]
pub struct LayerStore {
  root: PathBuf,
}

impl LayerStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn layers_dir(&self) -> PathBuf {
    self.root.join(LAYERS_DIR)
  }

  fn blobs_dir(&self) -> PathBuf {
    self.root.join(BLOBS_DIR)
  }

  fn layer_path(&self, key: &CacheKey) -> PathBuf {
    self.layers_dir().join(format!("{}.json", key))
  }

  fn blob_path(&self, digest: &ContentHash) -> PathBuf {
    self.blobs_dir().join(&digest.0)
  }

  fn ensure_dirs(&self) -> Result<(), StoreError> {
    for dir in [self.layers_dir(), self.blobs_dir()] {
      fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir { path: dir.clone(), source })?;
    }
    Ok(())
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.layer_path(key).is_file()
  }

  /// Persist `snapshot` under `key`. Existing blobs are not rewritten.
  pub fn save(&self, key: &CacheKey, snapshot: &Snapshot) -> Result<(), StoreError> {
    self.ensure_dirs()?;

    let mut written = 0usize;
    for (_, blob) in snapshot.filesystem.iter() {
      let path = self.blob_path(blob.digest());
      if path.is_file() {
        continue;
      }
      write_atomic(&path, blob.data())?;
      written += 1;
    }

    let layer = StoredLayer {
      version: LAYER_RECORD_VERSION,
      key: key.clone(),
      snapshot: snapshot.record(),
    };
    let content = serde_json::to_vec_pretty(&layer).map_err(|source| StoreError::Serialize {
      key: key.clone(),
      source,
    })?;
    write_atomic(&self.layer_path(key), &content)?;

    debug!(key = %key.short(), new_blobs = written, "layer persisted");
    Ok(())
  }

  /// Read the layer record for `key` without loading any blobs.
  pub fn record(&self, key: &CacheKey) -> Result<StoredLayer, StoreError> {
    let path = self.layer_path(key);
    let content = match fs::read(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound(key.clone())),
      Err(source) => return Err(StoreError::Read { path, source }),
    };
    let layer: StoredLayer = serde_json::from_slice(&content).map_err(|source| StoreError::Parse {
      path: path.clone(),
      source,
    })?;
    if layer.version != LAYER_RECORD_VERSION {
      return Err(StoreError::UnsupportedVersion {
        path,
        version: layer.version,
      });
    }
    Ok(layer)
  }

  /// Load the snapshot stored under `key`.
  ///
  /// Returns `Ok(None)` when the layer is absent, or when one of its blobs is
  /// missing or no longer matches its digest.
  pub fn load(&self, key: &CacheKey) -> Result<Option<Snapshot>, StoreError> {
    let layer = match self.record(key) {
      Ok(layer) => layer,
      Err(StoreError::NotFound(_)) => return Ok(None),
      Err(e) => return Err(e),
    };

    let mut entries = Vec::with_capacity(layer.snapshot.files.len());
    for (path, digest) in &layer.snapshot.files {
      let blob_path = self.blob_path(digest);
      let data = match fs::read(&blob_path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          warn!(key = %key.short(), blob = %digest.short(), "layer references missing blob, ignoring layer");
          return Ok(None);
        }
        Err(source) => return Err(StoreError::Read { path: blob_path, source }),
      };
      if hash_bytes(&data) != *digest {
        warn!(key = %key.short(), blob = %digest.short(), "blob content does not match digest, ignoring layer");
        return Ok(None);
      }
      entries.push((path.clone(), Blob::from_verified(digest.clone(), data)));
    }

    let record = layer.snapshot;
    Ok(Some(Snapshot {
      filesystem: Filesystem::from_entries(entries),
      work_dir: record.work_dir,
      exposed_ports: record.exposed_ports,
      entrypoint: record.entrypoint,
      env: record.env,
    }))
  }

  /// [`LayerStore::load`] on the blocking pool.
  pub async fn load_blocking(&self, key: &CacheKey) -> Result<Option<Snapshot>, StoreError> {
    let store = self.clone();
    let key = key.clone();
    tokio::task::spawn_blocking(move || store.load(&key)).await?
  }

  /// [`LayerStore::save`] on the blocking pool.
  pub async fn save_blocking(&self, key: &CacheKey, snapshot: &Snapshot) -> Result<(), StoreError> {
    let store = self.clone();
    let key = key.clone();
    let snapshot = snapshot.clone();
    tokio::task::spawn_blocking(move || store.save(&key, &snapshot)).await?
  }

  /// Keys of every persisted layer, sorted.
  pub fn layer_keys(&self) -> Result<Vec<CacheKey>, StoreError> {
    let mut keys: Vec<CacheKey> = list_dir(&self.layers_dir())?
      .into_iter()
      .filter_map(|name| name.strip_suffix(".json").map(CacheKey::from_hex))
      .collect();
    keys.sort();
    Ok(keys)
  }

  /// Digests of every stored blob, sorted.
  pub fn blob_digests(&self) -> Result<Vec<ContentHash>, StoreError> {
    let mut digests: Vec<ContentHash> = list_dir(&self.blobs_dir())?
      .into_iter()
      .filter(|name| !name.starts_with('.'))
      .map(ContentHash)
      .collect();
    digests.sort();
    Ok(digests)
  }

  /// Size of the layer record on disk, 0 if absent.
  pub fn layer_size(&self, key: &CacheKey) -> u64 {
    fs::metadata(self.layer_path(key)).map(|m| m.len()).unwrap_or(0)
  }

  /// Size of a blob on disk, 0 if absent.
  pub fn blob_size(&self, digest: &ContentHash) -> u64 {
    fs::metadata(self.blob_path(digest)).map(|m| m.len()).unwrap_or(0)
  }

  /// Remove a layer record. Returns the bytes freed.
  pub fn remove_layer(&self, key: &CacheKey) -> Result<u64, StoreError> {
    remove_file(&self.layer_path(key))
  }

  /// Remove a blob. Returns the bytes freed.
  pub fn remove_blob(&self, digest: &ContentHash) -> Result<u64, StoreError> {
    remove_file(&self.blob_path(digest))
  }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
  let write_err = |source: io::Error| StoreError::Write {
    path: path.to_path_buf(),
    source,
  };
  let dir = path.parent().unwrap_or(Path::new("."));
  let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
  temp.write_all(content).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;
  Ok(())
}

fn list_dir(dir: &Path) -> Result<Vec<String>, StoreError> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(StoreError::Read {
        path: dir.to_path_buf(),
        source,
      });
    }
  };

  let mut names = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| StoreError::Read {
      path: dir.to_path_buf(),
      source,
    })?;
    if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
      names.push(entry.file_name().to_string_lossy().into_owned());
    }
  }
  Ok(names)
}

fn remove_file(path: &Path) -> Result<u64, StoreError> {
  let size = match fs::metadata(path) {
    Ok(meta) => meta.len(),
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
    Err(source) => {
      return Err(StoreError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };
  match fs::remove_file(path) {
    Ok(()) => Ok(size),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
    Err(source) => Err(StoreError::Write {
      path: path.to_path_buf(),
      source,
    }),
  }
}
