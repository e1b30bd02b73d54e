//! Stage executor configuration and errors.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::base::BaseError;
use crate::context::{ContextError, ContextFile, ContextPath};
use crate::error::ErrorKind;
use crate::filesystem::Filesystem;
use crate::sandbox::SandboxError;
use crate::step::ArgumentError;
use crate::util::hash::{ContentHash, HashError, Hashable, hash_bytes};

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
  /// Upper bound on a single `RunCommand`. `None` waits indefinitely.
  pub command_timeout: Option<Duration>,
}

impl ExecutorConfig {
  pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.command_timeout = timeout;
    self
  }
}

/// External content a step reads, loaded once so that the layer key and
/// the layer itself are derived from the same bytes.
#[derive(Debug, Clone, Default)]
pub enum StepInput {
  #[default]
  None,
  /// Filesystem of the referenced base image.
  Base(Filesystem),
  /// Files read for each `CopyFiles` source, in declaration order.
  Context(Vec<(ContextPath, Vec<ContextFile>)>),
}

#[derive(Serialize)]
struct SourceDigest<'a> {
  source: &'a str,
  files: Vec<(&'a str, ContentHash)>,
}

#[derive(Serialize)]
struct CopyDigest<'a> {
  sources: Vec<SourceDigest<'a>>,
}

impl Hashable for CopyDigest<'_> {}

impl StepInput {
  /// Digest folded into the step's cache key, `None` for steps that read
  /// nothing outside the snapshot.
  pub fn digest(&self) -> Result<Option<ContentHash>, HashError> {
    match self {
      StepInput::None => Ok(None),
      StepInput::Base(filesystem) => filesystem.digest().map(Some),
      StepInput::Context(sources) => {
        let sources = sources
          .iter()
          .map(|(path, files)| SourceDigest {
            source: path.as_str(),
            files: files.iter().map(|f| (f.path.as_str(), hash_bytes(&f.data))).collect(),
          })
          .collect();
        CopyDigest { sources }.content_hash().map(Some)
      }
    }
  }
}

/// Errors raised while applying a single step.
#[derive(Debug, Error)]
pub enum StepError {
  #[error(transparent)]
  InvalidArguments(#[from] ArgumentError),

  #[error("{source}")]
  BaseNotFound {
    reference: String,
    #[source]
    source: BaseError,
  },

  #[error("invalid path {path:?}: {reason}")]
  InvalidPath { path: String, reason: String },

  #[error("source not found in build context: {path}")]
  SourceNotFound { path: String },

  #[error("invalid build context: {0}")]
  InvalidContext(#[source] ContextError),

  /// The command ran and exited unsuccessfully, or was killed by a signal.
  #[error("command failed with exit code {}: {command}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
  CommandFailed { command: String, exit_code: Option<i32> },

  #[error("command timed out after {}: {command}", humantime::format_duration(*timeout))]
  CommandTimeout { command: String, timeout: Duration },

  #[error("sandbox unavailable: {0}")]
  SandboxUnavailable(#[from] SandboxError),
}

impl StepError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      StepError::InvalidArguments(_) => ErrorKind::InvalidArguments,
      StepError::BaseNotFound { .. } => ErrorKind::BaseNotFound,
      StepError::InvalidPath { .. } => ErrorKind::InvalidPath,
      StepError::SourceNotFound { .. } => ErrorKind::SourceNotFound,
      StepError::InvalidContext(_) => ErrorKind::InvalidContext,
      StepError::CommandFailed { .. } => ErrorKind::CommandFailed,
      StepError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
      StepError::SandboxUnavailable(_) => ErrorKind::SandboxUnavailable,
    }
  }
}

impl From<ContextError> for StepError {
  fn from(err: ContextError) -> Self {
    match err {
      ContextError::NotFound { path } => StepError::SourceNotFound { path },
      other => StepError::InvalidContext(other),
    }
  }
}
