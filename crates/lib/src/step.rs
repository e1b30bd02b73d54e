//! Step descriptors: the instructions a build plan is made of.
//!
//! A [`StepDescriptor`] is plain data, a [`StepKind`] plus an ordered list of
//! string arguments, and is immutable once created. [`StepDescriptor::action`]
//! validates the arguments and returns a typed [`StepAction`] view.
//!
//! # Argument shapes
//!
//! | kind            | args                                   |
//! |-----------------|----------------------------------------|
//! | `SetBase`       | `[reference]`                          |
//! | `SetWorkDir`    | `[path]`                               |
//! | `CopyFiles`     | `[src, ..., dest]`                     |
//! | `RunCommand`    | `[program, arg, ...]`                  |
//! | `ExposePort`    | `[port, ...]` (`8000`, `8000/tcp`)     |
//! | `SetEntrypoint` | `[program, arg, ...]`                  |
//! | `SetEnv`        | `[KEY=VALUE, ...]`                     |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base::ImageRef;
use crate::util::hash::Hashable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
  SetBase,
  SetWorkDir,
  CopyFiles,
  RunCommand,
  ExposePort,
  SetEntrypoint,
  SetEnv,
}

impl StepKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StepKind::SetBase => "SetBase",
      StepKind::SetWorkDir => "SetWorkDir",
      StepKind::CopyFiles => "CopyFiles",
      StepKind::RunCommand => "RunCommand",
      StepKind::ExposePort => "ExposePort",
      StepKind::SetEntrypoint => "SetEntrypoint",
      StepKind::SetEnv => "SetEnv",
    }
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepDescriptor {
  kind: StepKind,
  #[serde(default)]
  args: Vec<String>,
}

impl Hashable for StepDescriptor {}

impl StepDescriptor {
  pub fn new<I, S>(kind: StepKind, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind,
      args: args.into_iter().map(Into::into).collect(),
    }
  }

  pub fn set_base(reference: &str) -> Self {
    Self::new(StepKind::SetBase, [reference])
  }

  pub fn set_work_dir(path: &str) -> Self {
    Self::new(StepKind::SetWorkDir, [path])
  }

  pub fn copy_files(sources: &[&str], dest: &str) -> Self {
    Self::new(StepKind::CopyFiles, sources.iter().copied().chain([dest]))
  }

  pub fn run_command(command: &[&str]) -> Self {
    Self::new(StepKind::RunCommand, command.iter().copied())
  }

  pub fn expose_port(port: u16) -> Self {
    Self::new(StepKind::ExposePort, [port.to_string()])
  }

  pub fn set_entrypoint(command: &[&str]) -> Self {
    Self::new(StepKind::SetEntrypoint, command.iter().copied())
  }

  pub fn set_env(key: &str, value: &str) -> Self {
    Self::new(StepKind::SetEnv, [format!("{}={}", key, value)])
  }

  pub fn kind(&self) -> StepKind {
    self.kind
  }

  pub fn args(&self) -> &[String] {
    &self.args
  }

  /// Validate the arguments and return the typed action.
  pub fn action(&self) -> Result<StepAction<'_>, ArgumentError> {
    let invalid = |reason: &str| ArgumentError {
      kind: self.kind,
      reason: reason.to_string(),
    };
    let args = self.args.as_slice();

    match self.kind {
      StepKind::SetBase => match args {
        [reference] => ImageRef::parse(reference)
          .map(StepAction::SetBase)
          .map_err(|e| invalid(&e.to_string())),
        _ => Err(invalid("expected exactly one image reference")),
      },
      StepKind::SetWorkDir => match args {
        [path] if !path.is_empty() => Ok(StepAction::SetWorkDir(path)),
        _ => Err(invalid("expected exactly one path")),
      },
      StepKind::CopyFiles => match args {
        [sources @ .., dest] if !sources.is_empty() => Ok(StepAction::CopyFiles { sources, dest }),
        _ => Err(invalid("expected at least one source and a destination")),
      },
      StepKind::RunCommand => match args {
        [] => Err(invalid("expected a command")),
        command => Ok(StepAction::RunCommand(command)),
      },
      StepKind::ExposePort => {
        if args.is_empty() {
          return Err(invalid("expected at least one port"));
        }
        let ports = args.iter().map(|p| parse_port(p)).collect::<Result<Vec<_>, _>>();
        ports.map(StepAction::ExposePort).map_err(|reason| invalid(&reason))
      }
      StepKind::SetEntrypoint => match args {
        [] => Err(invalid("expected a command")),
        command => Ok(StepAction::SetEntrypoint(command)),
      },
      StepKind::SetEnv => {
        if args.is_empty() {
          return Err(invalid("expected at least one KEY=VALUE pair"));
        }
        let pairs = args.iter().map(|p| parse_env_pair(p)).collect::<Result<Vec<_>, _>>();
        pairs.map(StepAction::SetEnv).map_err(|reason| invalid(&reason))
      }
    }
  }
}

impl fmt::Display for StepDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.kind)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// Typed, validated view of a [`StepDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction<'a> {
  SetBase(ImageRef),
  SetWorkDir(&'a str),
  CopyFiles { sources: &'a [String], dest: &'a str },
  RunCommand(&'a [String]),
  ExposePort(Vec<u16>),
  SetEntrypoint(&'a [String]),
  SetEnv(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid arguments for {kind}: {reason}")]
pub struct ArgumentError {
  pub kind: StepKind,
  pub reason: String,
}

/// Parse `8000`, `8000/tcp` or `8000/udp`.
pub fn parse_port(raw: &str) -> Result<u16, String> {
  let number = match raw.split_once('/') {
    Some((number, "tcp" | "udp")) => number,
    Some((_, proto)) => return Err(format!("unsupported protocol {:?} in {:?}", proto, raw)),
    None => raw,
  };
  match number.parse::<u16>() {
    Ok(0) | Err(_) => Err(format!("invalid port {:?}", raw)),
    Ok(port) => Ok(port),
  }
}

/// Parse `KEY=VALUE`. The value may be empty or contain `=`.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.is_empty() && !key.chars().any(char::is_whitespace) => {
      Ok((key.to_string(), value.to_string()))
    }
    _ => Err(format!("invalid environment pair {:?}", raw)),
  }
}
