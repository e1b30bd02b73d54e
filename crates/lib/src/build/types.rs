//! Builder results and errors.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::cache::{CacheKey, CacheStatus};
use crate::error::ErrorKind;
use crate::execute::StepError;
use crate::image::ImageManifest;
use crate::plan::PlanWarning;
use crate::snapshot::Snapshot;
use crate::step::StepKind;
use crate::store::StoreError;
use crate::util::hash::HashError;

#[derive(Debug, Error)]
pub enum BuildError {
  /// A stage failed. Layers committed before it remain cached.
  #[error("step {index} ({kind}) failed: {source}")]
  Step {
    index: usize,
    kind: StepKind,
    #[source]
    source: StepError,
  },

  #[error("layer store error: {0}")]
  Store(#[from] StoreError),

  #[error("failed to hash step {index}: {source}")]
  Hash {
    index: usize,
    #[source]
    source: HashError,
  },
}

impl BuildError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      BuildError::Step { source, .. } => source.kind(),
      BuildError::Store(_) | BuildError::Hash { .. } => ErrorKind::Storage,
    }
  }

  /// Declaration index of the step that failed, if the failure belongs to one.
  pub fn index(&self) -> Option<usize> {
    match self {
      BuildError::Step { index, .. } | BuildError::Hash { index, .. } => Some(*index),
      BuildError::Store(_) => None,
    }
  }
}

/// How one step's layer was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerReport {
  pub index: usize,
  pub kind: StepKind,
  pub key: CacheKey,
  pub status: CacheStatus,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
  pub snapshot: Snapshot,
  pub layers: Vec<LayerReport>,
  pub warnings: Vec<PlanWarning>,
  pub elapsed: Duration,
}

impl BuildOutcome {
  /// Layers that did not have to be recomputed.
  pub fn cache_hits(&self) -> usize {
    self.layers.iter().filter(|l| l.status.is_cached()).count()
  }

  pub fn top_key(&self) -> Option<&CacheKey> {
    self.layers.last().map(|l| &l.key)
  }

  pub fn manifest(&self) -> Result<ImageManifest, HashError> {
    let layers = self.layers.iter().map(|l| l.key.clone()).collect();
    ImageManifest::new(layers, &self.snapshot)
  }
}
