//! Recipe files: the JSON form of a step list.
//!
//! ```json
//! {
//!   "steps": [
//!     { "kind": "SetBase", "args": ["python:3.11-slim"] },
//!     { "kind": "SetWorkDir", "args": ["/app"] },
//!     { "kind": "CopyFiles", "args": ["requirements.txt", "."] }
//!   ]
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::step::StepDescriptor;

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("recipe not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse recipe {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

impl RecipeError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      RecipeError::NotFound(_) | RecipeError::Parse { .. } => ErrorKind::InvalidArguments,
      RecipeError::Read { .. } => ErrorKind::Storage,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
  pub steps: Vec<StepDescriptor>,
}

impl Recipe {
  pub fn load(path: &Path) -> Result<Self, RecipeError> {
    let content = fs::read_to_string(path).map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        RecipeError::NotFound(path.to_path_buf())
      } else {
        RecipeError::Read {
          path: path.to_path_buf(),
          source,
        }
      }
    })?;
    Self::parse(path, &content)
  }

  pub fn parse(path: &Path, content: &str) -> Result<Self, RecipeError> {
    serde_json::from_str(content).map_err(|source| RecipeError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}
