//! Content-addressed filesystem state carried by snapshots.
//!
//! A [`Filesystem`] maps absolute, normalized paths (`/app/main.py`) to
//! [`Blob`]s. Directories are implicit: a directory exists while some file
//! lives under it. The map sits behind an `Arc`, so handing a filesystem to
//! the next stage is a pointer copy and the first write clones it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::util::hash::{ContentHash, HashError, Hashable, hash_bytes};

/// Immutable file content together with its SHA-256 digest.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
  digest: ContentHash,
  data: Arc<Vec<u8>>,
}

impl Blob {
  pub fn new(data: impl Into<Vec<u8>>) -> Self {
    let data = data.into();
    Self {
      digest: hash_bytes(&data),
      data: Arc::new(data),
    }
  }

  /// Assemble a blob whose digest was already verified by the caller.
  pub(crate) fn from_verified(digest: ContentHash, data: Vec<u8>) -> Self {
    Self {
      digest,
      data: Arc::new(data),
    }
  }

  pub fn digest(&self) -> &ContentHash {
    &self.digest
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl fmt::Debug for Blob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Blob")
      .field("digest", &self.digest.short())
      .field("len", &self.data.len())
      .finish()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filesystem {
  entries: Arc<BTreeMap<String, Blob>>,
}

impl Filesystem {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_entries<I>(entries: I) -> Self
  where
    I: IntoIterator<Item = (String, Blob)>,
  {
    Self {
      entries: Arc::new(entries.into_iter().map(|(path, blob)| (resolve_path("/", &path), blob)).collect()),
    }
  }

  pub fn get(&self, path: &str) -> Option<&Blob> {
    self.entries.get(path)
  }

  /// Write `blob` at `path`, replacing any existing file.
  pub fn insert(&mut self, path: impl AsRef<str>, blob: Blob) {
    let path = resolve_path("/", path.as_ref());
    Arc::make_mut(&mut self.entries).insert(path, blob);
  }

  /// Returns true if some file lives strictly below `path`.
  pub fn is_dir(&self, path: &str) -> bool {
    if path == "/" {
      return !self.entries.is_empty();
    }
    let prefix = format!("{}/", path.trim_end_matches('/'));
    self
      .entries
      .range(prefix.clone()..)
      .next()
      .is_some_and(|(p, _)| p.starts_with(&prefix))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Blob)> {
    self.entries.iter()
  }

  /// The path → digest table, which is all that identifies this filesystem.
  pub fn file_table(&self) -> BTreeMap<String, ContentHash> {
    self
      .entries
      .iter()
      .map(|(path, blob)| (path.clone(), blob.digest().clone()))
      .collect()
  }

  pub fn digest(&self) -> Result<ContentHash, HashError> {
    self.file_table().content_hash()
  }
}

impl Hashable for BTreeMap<String, ContentHash> {}

/// Resolve `path` against the absolute directory `base`.
///
/// Purely lexical: `.` segments are dropped, `..` pops a segment and never
/// climbs above `/`. An absolute `path` ignores `base`.
pub fn resolve_path(base: &str, path: &str) -> String {
  let mut segments: Vec<&str> = Vec::new();
  let joined = if path.starts_with('/') {
    path.to_string()
  } else {
    format!("{}/{}", base, path)
  };

  for segment in joined.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        segments.pop();
      }
      other => segments.push(other),
    }
  }

  format!("/{}", segments.join("/"))
}

/// Join a relative `name` onto the absolute directory `dir`.
pub fn join_path(dir: &str, name: &str) -> String {
  resolve_path(dir, name)
}

/// Returns true if `path` is absolute in the snapshot's path convention.
pub fn is_absolute(path: &str) -> bool {
  path.starts_with('/')
}
