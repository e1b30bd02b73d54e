//! Error classification shared by every pipeline stage.
//!
//! Each component has its own `thiserror` enum; [`ErrorKind`] is the coarse
//! category they all map onto, which the CLI turns into an exit code.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
  InvalidArguments,
  InvalidContext,
  EmptyPlan,
  BaseNotFound,
  SourceNotFound,
  InvalidPath,
  CommandFailed,
  CommandTimeout,
  SandboxUnavailable,
  NoEntrypoint,
  ImageNotFound,
  Storage,
}

impl ErrorKind {
  /// Process exit code used by the command line.
  pub fn exit_code(&self) -> i32 {
    match self {
      ErrorKind::InvalidArguments => 2,
      ErrorKind::InvalidContext => 3,
      ErrorKind::EmptyPlan => 4,
      ErrorKind::BaseNotFound => 5,
      ErrorKind::SourceNotFound => 6,
      ErrorKind::InvalidPath => 7,
      ErrorKind::CommandFailed => 8,
      ErrorKind::CommandTimeout => 9,
      ErrorKind::SandboxUnavailable => 10,
      ErrorKind::NoEntrypoint => 11,
      ErrorKind::ImageNotFound => 12,
      ErrorKind::Storage => 1,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::InvalidArguments => "InvalidArguments",
      ErrorKind::InvalidContext => "InvalidContext",
      ErrorKind::EmptyPlan => "EmptyPlan",
      ErrorKind::BaseNotFound => "BaseNotFound",
      ErrorKind::SourceNotFound => "SourceNotFound",
      ErrorKind::InvalidPath => "InvalidPath",
      ErrorKind::CommandFailed => "CommandFailed",
      ErrorKind::CommandTimeout => "CommandTimeout",
      ErrorKind::SandboxUnavailable => "SandboxUnavailable",
      ErrorKind::NoEntrypoint => "NoEntrypoint",
      ErrorKind::ImageNotFound => "ImageNotFound",
      ErrorKind::Storage => "Storage",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
