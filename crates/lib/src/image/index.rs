//! Local image index.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/images/
//! ├── index.json          # ImageIndex: tag -> image id
//! └── <id>.json           # ImageManifest
//! ```
//!
//! Both files are written to a temp file and renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use super::{ImageManifest, MANIFEST_VERSION};
use crate::base::ImageRef;
use crate::error::ErrorKind;
use crate::util::hash::ObjectHash;

pub const IMAGE_INDEX_VERSION: u32 = 1;

const INDEX_FILENAME: &str = "index.json";

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("image not found: {0}")]
  NotFound(String),

  #[error("invalid image tag {0:?}")]
  InvalidTag(String),

  #[error("failed to create image directory: {0}")]
  CreateDir(#[source] io::Error),

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

  #[error("failed to serialize image data: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported version {version} in {path}")]
  UnsupportedVersion { path: PathBuf, version: u32 },
}

impl ImageError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ImageError::NotFound(_) => ErrorKind::ImageNotFound,
      ImageError::InvalidTag(_) => ErrorKind::InvalidArguments,
      _ => ErrorKind::Storage,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
  pub id: ObjectHash,
  pub created_at_unix: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIndex {
  pub version: u32,
  pub tags: BTreeMap<String, TagEntry>,
}

impl Default for ImageIndex {
  fn default() -> Self {
    Self {
      version: IMAGE_INDEX_VERSION,
      tags: BTreeMap::new(),
    }
  }
}

/// One row of `strata images`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
  pub tag: String,
  pub id: ObjectHash,
  pub created_at_unix: u64,
  pub layers: usize,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
  base_path: PathBuf,
}

impl ImageStore {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn index_path(&self) -> PathBuf {
    self.base_path.join(INDEX_FILENAME)
  }

  fn manifest_path(&self, id: &ObjectHash) -> PathBuf {
    self.base_path.join(format!("{}.json", id))
  }

  fn ensure_dir(&self) -> Result<(), ImageError> {
    fs::create_dir_all(&self.base_path).map_err(ImageError::CreateDir)
  }

  /// Load the tag index. A missing index is empty.
  pub fn load_index(&self) -> Result<ImageIndex, ImageError> {
    let path = self.index_path();
    let content = match fs::read(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ImageIndex::default()),
      Err(source) => return Err(ImageError::Read { path, source }),
    };

    let index: ImageIndex = serde_json::from_slice(&content).map_err(|source| ImageError::Parse {
      path: path.clone(),
      source,
    })?;
    if index.version != IMAGE_INDEX_VERSION {
      return Err(ImageError::UnsupportedVersion {
        path,
        version: index.version,
      });
    }
    Ok(index)
  }

  fn save_index(&self, index: &ImageIndex) -> Result<(), ImageError> {
    let content = serde_json::to_vec_pretty(index).map_err(ImageError::Serialize)?;
    write_atomic(&self.index_path(), &content)
  }

  /// Store `manifest` and point `tag` at it. Returns the image id.
  pub fn save(&self, tag: &str, manifest: &ImageManifest) -> Result<ObjectHash, ImageError> {
    let tag = normalize_tag(tag)?;
    self.ensure_dir()?;

    let id = manifest.id().map_err(ImageError::Serialize)?;
    let content = serde_json::to_vec_pretty(manifest).map_err(ImageError::Serialize)?;
    write_atomic(&self.manifest_path(&id), &content)?;

    let created_at_unix = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    let mut index = self.load_index()?;
    if let Some(previous) = index.tags.insert(tag.clone(), TagEntry { id: id.clone(), created_at_unix })
      && previous.id != id
    {
      debug!(tag = %tag, previous = %previous.id, "tag moved");
    }
    self.save_index(&index)?;

    info!(tag = %tag, id = %id, "image saved");
    Ok(id)
  }

  pub fn load_manifest(&self, id: &ObjectHash) -> Result<ImageManifest, ImageError> {
    let path = self.manifest_path(id);
    let content = fs::read(&path).map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        ImageError::NotFound(id.to_string())
      } else {
        ImageError::Read {
          path: path.clone(),
          source,
        }
      }
    })?;
    let manifest: ImageManifest = serde_json::from_slice(&content).map_err(|source| ImageError::Parse {
      path: path.clone(),
      source,
    })?;
    if manifest.version != MANIFEST_VERSION {
      return Err(ImageError::UnsupportedVersion {
        path,
        version: manifest.version,
      });
    }
    Ok(manifest)
  }

  /// Resolve a tag (`app`, `app:v1`) or an image id to its manifest.
  pub fn resolve(&self, reference: &str) -> Result<(ObjectHash, ImageManifest), ImageError> {
    let index = self.load_index()?;
    if let Ok(tag) = normalize_tag(reference)
      && let Some(entry) = index.tags.get(&tag)
    {
      let manifest = self.load_manifest(&entry.id)?;
      return Ok((entry.id.clone(), manifest));
    }

    let id = ObjectHash(reference.to_string());
    if self.manifest_path(&id).is_file() {
      let manifest = self.load_manifest(&id)?;
      return Ok((id, manifest));
    }
    Err(ImageError::NotFound(reference.to_string()))
  }

  /// Every tagged image, sorted by tag.
  pub fn list(&self) -> Result<Vec<ImageSummary>, ImageError> {
    let index = self.load_index()?;
    let mut images = Vec::with_capacity(index.tags.len());
    for (tag, entry) in index.tags {
      let layers = self.load_manifest(&entry.id).map(|m| m.layers.len()).unwrap_or(0);
      images.push(ImageSummary {
        tag,
        id: entry.id,
        created_at_unix: entry.created_at_unix,
        layers,
      });
    }
    Ok(images)
  }

  /// Manifests reachable from a tag. These are the gc roots.
  pub fn tagged_manifests(&self) -> Result<Vec<ImageManifest>, ImageError> {
    let index = self.load_index()?;
    let mut manifests = Vec::with_capacity(index.tags.len());
    for entry in index.tags.values() {
      manifests.push(self.load_manifest(&entry.id)?);
    }
    Ok(manifests)
  }

  /// Remove a tag. Returns false if it did not exist.
  pub fn remove_tag(&self, tag: &str) -> Result<bool, ImageError> {
    let tag = normalize_tag(tag)?;
    let mut index = self.load_index()?;
    if index.tags.remove(&tag).is_none() {
      return Ok(false);
    }
    self.save_index(&index)?;
    Ok(true)
  }

  /// Delete manifest files no tag points at. Returns how many were removed.
  pub fn prune_untagged(&self) -> Result<usize, ImageError> {
    let index = self.load_index()?;
    let entries = match fs::read_dir(&self.base_path) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
      Err(source) => {
        return Err(ImageError::Read {
          path: self.base_path.clone(),
          source,
        });
      }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
      let name = entry.file_name().to_string_lossy().into_owned();
      let Some(id) = name.strip_suffix(".json") else {
        continue;
      };
      if name == INDEX_FILENAME || index.tags.values().any(|t| t.id.0 == id) {
        continue;
      }
      fs::remove_file(entry.path()).map_err(|source| ImageError::Write {
        path: entry.path(),
        source,
      })?;
      removed += 1;
    }
    Ok(removed)
  }
}

/// `app` → `app:latest`. Digest-pinned references are not valid tags.
pub fn normalize_tag(tag: &str) -> Result<String, ImageError> {
  let parsed = ImageRef::parse(tag).map_err(|_| ImageError::InvalidTag(tag.to_string()))?;
  if parsed.digest.is_some() {
    return Err(ImageError::InvalidTag(tag.to_string()));
  }
  Ok(parsed.canonical())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ImageError> {
  let write_err = |source: io::Error| ImageError::Write {
    path: path.to_path_buf(),
    source,
  };
  let dir = path.parent().unwrap_or(Path::new("."));
  let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
  temp.write_all(content).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;
  Ok(())
}
