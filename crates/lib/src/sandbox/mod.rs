//! Sandboxed command execution for `RunCommand`.
//!
//! The executor never spawns processes itself. It hands a [`SandboxRequest`]
//! to a [`SandboxRunner`], which runs the command against a private view of
//! the snapshot's filesystem and returns the resulting tree. The runner must
//! not touch the caller's filesystem, and fails with
//! [`SandboxError::Unavailable`] when it cannot guarantee that. Committing the
//! result is up to the executor.

mod confine;
mod host;

use std::collections::BTreeMap;
use std::future::Future;
use std::io;

use thiserror::Error;

use crate::filesystem::Filesystem;

pub use host::HostRunner;

/// Everything a runner needs to execute one command.
#[derive(Debug, Clone, Copy)]
pub struct SandboxRequest<'a> {
  /// Program followed by its arguments. Never empty.
  pub command: &'a [String],
  pub filesystem: &'a Filesystem,
  /// Absolute working directory inside the filesystem.
  pub work_dir: &'a str,
  /// Environment declared by the image so far.
  pub env: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SandboxOutcome {
  /// `None` when the process was terminated by a signal.
  pub exit_code: Option<i32>,
  /// The filesystem as the command left it.
  pub filesystem: Filesystem,
}

impl SandboxOutcome {
  pub fn success(&self) -> bool {
    self.exit_code == Some(0)
  }
}

#[derive(Debug, Error)]
pub enum SandboxError {
  #[error("{0}")]
  Unavailable(String),

  #[error("sandbox io error: {0}")]
  Io(#[from] io::Error),
}

/// Runs a command against a private materialized filesystem.
pub trait SandboxRunner: Send + Sync {
  fn run(&self, request: SandboxRequest<'_>) -> impl Future<Output = Result<SandboxOutcome, SandboxError>> + Send;
}
