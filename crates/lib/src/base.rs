//! Base image references and the stores that resolve them.
//!
//! `SetBase` asks a [`BaseStore`] for the filesystem of a reference such as
//! `python:3.11-slim` or `base@sha256:<digest>`. The pipeline treats the
//! store as an opaque content fetch.
//!
//! - [`LocalBaseStore`] reads unpacked root filesystems from
//!   `<root>/<name>/<tag>/` and always knows `scratch`
//! - [`MemoryBaseStore`] holds filesystems registered in memory

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::SCRATCH_IMAGE;
use crate::filesystem::{Blob, Filesystem};

const DEFAULT_TAG: &str = "latest";

/// A parsed `name[:tag][@digest]` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
  pub name: String,
  pub tag: Option<String>,
  pub digest: Option<String>,
}

impl ImageRef {
  pub fn parse(reference: &str) -> Result<Self, BaseError> {
    let invalid = || BaseError::InvalidReference(reference.to_string());
    let reference = reference.trim();

    let (rest, digest) = match reference.split_once('@') {
      Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
      Some(_) => return Err(invalid()),
      None => (reference, None),
    };

    // A ':' only starts a tag after the last '/', so registry ports survive.
    let name_start = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (name, tag) = match rest[name_start..].rfind(':') {
      Some(pos) => {
        let split = name_start + pos;
        let tag = &rest[split + 1..];
        if tag.is_empty() {
          return Err(invalid());
        }
        (&rest[..split], Some(tag.to_string()))
      }
      None => (rest, None),
    };

    if name.is_empty() || name.chars().any(char::is_whitespace) {
      return Err(invalid());
    }

    Ok(Self {
      name: name.to_string(),
      tag,
      digest,
    })
  }

  pub fn tag_or_latest(&self) -> &str {
    self.tag.as_deref().unwrap_or(DEFAULT_TAG)
  }

  /// `name:tag` with the default tag filled in.
  pub fn canonical(&self) -> String {
    format!("{}:{}", self.name, self.tag_or_latest())
  }

  pub fn is_scratch(&self) -> bool {
    self.name == SCRATCH_IMAGE
  }
}

impl FromStr for ImageRef {
  type Err = BaseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name)?;
    if let Some(tag) = &self.tag {
      write!(f, ":{}", tag)?;
    }
    if let Some(digest) = &self.digest {
      write!(f, "@{}", digest)?;
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum BaseError {
  #[error("invalid image reference: {0:?}")]
  InvalidReference(String),

  #[error("base image not found: {0}")]
  NotFound(String),

  #[error("base image {reference} has digest {actual}, expected {expected}")]
  DigestMismatch {
    reference: String,
    expected: String,
    actual: String,
  },

  #[error("failed to load base image {reference}: {message}")]
  Load { reference: String, message: String },
}

/// Source of base filesystems for `SetBase`.
pub trait BaseStore: Send + Sync {
  fn fetch(&self, reference: &ImageRef) -> Result<Filesystem, BaseError>;
}

/// Check a pinned `@sha256:<hex>` digest against the fetched filesystem.
fn verify_digest(reference: &ImageRef, filesystem: &Filesystem) -> Result<(), BaseError> {
  let Some(expected) = &reference.digest else {
    return Ok(());
  };
  let actual = filesystem.digest().map_err(|e| BaseError::Load {
    reference: reference.to_string(),
    message: e.to_string(),
  })?;
  let expected_hex = expected.strip_prefix("sha256:").unwrap_or(expected);
  if actual.0 != expected_hex {
    return Err(BaseError::DigestMismatch {
      reference: reference.to_string(),
      expected: expected_hex.to_string(),
      actual: actual.0,
    });
  }
  Ok(())
}

/// Base images unpacked on disk under `<root>/<name>/<tag>/`.
#[derive(Debug, Clone)]
pub struct LocalBaseStore {
  root: PathBuf,
}

impl LocalBaseStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn image_dir(&self, reference: &ImageRef) -> PathBuf {
    let mut dir = self.root.clone();
    for segment in reference.name.split('/') {
      dir.push(segment);
    }
    dir.join(reference.tag_or_latest())
  }
}

impl BaseStore for LocalBaseStore {
  fn fetch(&self, reference: &ImageRef) -> Result<Filesystem, BaseError> {
    if reference.is_scratch() {
      return Ok(Filesystem::new());
    }

    let dir = self.image_dir(reference);
    if !dir.is_dir() {
      return Err(BaseError::NotFound(reference.to_string()));
    }

    debug!(reference = %reference, dir = %dir.display(), "loading base image");

    let load_err = |message: String| BaseError::Load {
      reference: reference.to_string(),
      message,
    };

    let mut filesystem = Filesystem::new();
    for entry in WalkDir::new(&dir).follow_links(true).sort_by_file_name() {
      let entry = entry.map_err(|e| load_err(e.to_string()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
      let path = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
      let data = std::fs::read(entry.path()).map_err(|e| load_err(format!("{}: {}", entry.path().display(), e)))?;
      filesystem.insert(format!("/{}", path), Blob::new(data));
    }

    verify_digest(reference, &filesystem)?;
    Ok(filesystem)
  }
}

/// Base images registered in memory, keyed by `name:tag`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBaseStore {
  images: HashMap<String, Filesystem>,
}

impl MemoryBaseStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, reference: &str, filesystem: Filesystem) -> Result<(), BaseError> {
    let parsed = ImageRef::parse(reference)?;
    self.images.insert(parsed.canonical(), filesystem);
    Ok(())
  }

  pub fn with_image(mut self, reference: &str, filesystem: Filesystem) -> Self {
    if let Ok(parsed) = ImageRef::parse(reference) {
      self.images.insert(parsed.canonical(), filesystem);
    }
    self
  }
}

impl BaseStore for MemoryBaseStore {
  fn fetch(&self, reference: &ImageRef) -> Result<Filesystem, BaseError> {
    if let Some(filesystem) = self.images.get(&reference.canonical()) {
      verify_digest(reference, filesystem)?;
      return Ok(filesystem.clone());
    }
    if reference.is_scratch() {
      return Ok(Filesystem::new());
    }
    Err(BaseError::NotFound(reference.to_string()))
  }
}
