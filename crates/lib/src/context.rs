//! Build contexts: the read-only source trees available to `CopyFiles`.
//!
//! Every source path is first parsed into a [`ContextPath`], which normalizes
//! it lexically and rejects anything that climbs out of the context root.
//! [`DirContext`] additionally canonicalizes paths on disk so that symlinks
//! cannot point outside the root either.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ContextError {
  #[error("path {path:?} escapes the build context")]
  Escapes { path: String },

  #[error("source not found in build context: {path}")]
  NotFound { path: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: io::Error,
  },
}

impl ContextError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ContextError::NotFound { .. } => ErrorKind::SourceNotFound,
      ContextError::Escapes { .. } | ContextError::Read { .. } => ErrorKind::InvalidContext,
    }
  }
}

/// A normalized path relative to the context root. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextPath(String);

impl ContextPath {
  /// Normalize `raw` lexically.
  ///
  /// A leading `/` is relative to the context root. Fails with
  /// [`ContextError::Escapes`] when `..` would leave the root.
  pub fn parse(raw: &str) -> Result<Self, ContextError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split(['/', '\\']) {
      match segment {
        "" | "." => {}
        ".." => {
          if segments.pop().is_none() {
            return Err(ContextError::Escapes { path: raw.to_string() });
          }
        }
        other => segments.push(other),
      }
    }
    Ok(Self(segments.join("/")))
  }

  pub fn root() -> Self {
    Self(String::new())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  pub fn file_name(&self) -> Option<&str> {
    self.0.rsplit('/').next().filter(|name| !name.is_empty())
  }

  fn to_native(&self, root: &Path) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in self.0.split('/').filter(|s| !s.is_empty()) {
      path.push(segment);
    }
    path
  }
}

/// One file read from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
  /// Path below the requested source, `/`-separated. Empty when the source
  /// itself is a file.
  pub path: String,
  pub data: Vec<u8>,
}

pub trait BuildContext: Send + Sync {
  /// Confirm that `path` stays inside the context once resolved on the
  /// underlying storage. A missing path is not an error here.
  fn check(&self, path: &ContextPath) -> Result<(), ContextError>;

  /// Read the file at `path`, or every file below it, sorted by path.
  fn read(&self, path: &ContextPath) -> Result<Vec<ContextFile>, ContextError>;
}

/// A build context backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirContext {
  root: PathBuf,
}

impl DirContext {
  pub fn new(root: impl AsRef<Path>) -> Result<Self, ContextError> {
    let root = root.as_ref();
    let root = dunce::canonicalize(root).map_err(|source| ContextError::Read {
      path: root.display().to_string(),
      source,
    })?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Canonicalize `path` and verify it is still under the root.
  fn contain(&self, shown: &str, path: &Path) -> Result<PathBuf, ContextError> {
    let resolved = dunce::canonicalize(path).map_err(|source| ContextError::Read {
      path: shown.to_string(),
      source,
    })?;
    if !resolved.starts_with(&self.root) {
      return Err(ContextError::Escapes {
        path: shown.to_string(),
      });
    }
    Ok(resolved)
  }

  fn read_file(shown: &str, path: &Path) -> Result<Vec<u8>, ContextError> {
    std::fs::read(path).map_err(|source| ContextError::Read {
      path: shown.to_string(),
      source,
    })
  }
}

impl BuildContext for DirContext {
  fn check(&self, path: &ContextPath) -> Result<(), ContextError> {
    let native = path.to_native(&self.root);
    if native.symlink_metadata().is_err() {
      return Ok(());
    }
    self.contain(path.as_str(), &native).map(|_| ())
  }

  fn read(&self, path: &ContextPath) -> Result<Vec<ContextFile>, ContextError> {
    let native = path.to_native(&self.root);
    if native.symlink_metadata().is_err() {
      return Err(ContextError::NotFound {
        path: path.as_str().to_string(),
      });
    }

    let resolved = self.contain(path.as_str(), &native)?;
    if resolved.is_file() {
      let data = Self::read_file(path.as_str(), &resolved)?;
      return Ok(vec![ContextFile {
        path: String::new(),
        data,
      }]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&native).sort_by_file_name() {
      let entry = entry.map_err(|e| ContextError::Read {
        path: path.as_str().to_string(),
        source: e.into(),
      })?;
      let rel = entry.path().strip_prefix(&native).unwrap_or(entry.path());
      let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
      if rel.is_empty() {
        continue;
      }
      let shown = if path.is_root() {
        rel.clone()
      } else {
        format!("{}/{}", path.as_str(), rel)
      };

      let file_type = entry.file_type();
      let target = if file_type.is_symlink() {
        let target = self.contain(&shown, entry.path())?;
        if !target.is_file() {
          debug!(path = %shown, "skipping symlink to non-file");
          continue;
        }
        target
      } else if file_type.is_file() {
        entry.path().to_path_buf()
      } else {
        continue;
      };

      let data = Self::read_file(&shown, &target)?;
      files.push(ContextFile { path: rel, data });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
  }
}

/// A build context held in memory, keyed by normalized relative path.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
  files: BTreeMap<String, Vec<u8>>,
}

impl MemoryContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add or replace a file. Paths that escape the root are ignored.
  pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
    self.insert(path, data);
    self
  }

  pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) {
    if let Ok(path) = ContextPath::parse(path)
      && !path.is_root()
    {
      self.files.insert(path.0, data.into());
    }
  }
}

impl BuildContext for MemoryContext {
  fn check(&self, _path: &ContextPath) -> Result<(), ContextError> {
    Ok(())
  }

  fn read(&self, path: &ContextPath) -> Result<Vec<ContextFile>, ContextError> {
    if let Some(data) = self.files.get(path.as_str()) {
      return Ok(vec![ContextFile {
        path: String::new(),
        data: data.clone(),
      }]);
    }

    let prefix = if path.is_root() {
      String::new()
    } else {
      format!("{}/", path.as_str())
    };
    let files: Vec<ContextFile> = self
      .files
      .iter()
      .filter_map(|(p, data)| {
        p.strip_prefix(&prefix).map(|rel| ContextFile {
          path: rel.to_string(),
          data: data.clone(),
        })
      })
      .collect();

    if files.is_empty() && !path.is_root() {
      return Err(ContextError::NotFound {
        path: path.as_str().to_string(),
      });
    }
    Ok(files)
  }
}
