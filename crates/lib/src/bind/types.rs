//! Launch binder types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::image::ImageManifest;
use crate::snapshot::Snapshot;
use crate::step::parse_port;

#[derive(Debug, Error)]
pub enum BindError {
  #[error("image has no entrypoint and no command was given")]
  NoEntrypoint,

  #[error("invalid port binding {0:?}: expected PORT or HOST:CONTAINER")]
  InvalidPortBinding(String),
}

impl BindError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      BindError::NoEntrypoint => ErrorKind::NoEntrypoint,
      BindError::InvalidPortBinding(_) => ErrorKind::InvalidArguments,
    }
  }
}

/// The launch-relevant part of a snapshot or image manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchConfig {
  pub entrypoint: Option<Vec<String>>,
  pub work_dir: String,
  pub exposed_ports: BTreeSet<u16>,
  pub env: BTreeMap<String, String>,
}

impl From<&Snapshot> for LaunchConfig {
  fn from(snapshot: &Snapshot) -> Self {
    Self {
      entrypoint: snapshot.entrypoint.clone(),
      work_dir: snapshot.work_dir.clone(),
      exposed_ports: snapshot.exposed_ports.clone(),
      env: snapshot.env.clone(),
    }
  }
}

impl From<&ImageManifest> for LaunchConfig {
  fn from(manifest: &ImageManifest) -> Self {
    Self {
      entrypoint: manifest.entrypoint.clone(),
      work_dir: manifest.work_dir.clone(),
      exposed_ports: manifest.exposed_ports.clone(),
      env: manifest.env.clone(),
    }
  }
}

/// A host port forwarded to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortBinding {
  pub host: u16,
  pub container: u16,
}

impl FromStr for PortBinding {
  type Err = BindError;

  /// `8000` binds the same port on both sides; `8080:8000` maps host 8080
  /// to container 8000.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || BindError::InvalidPortBinding(s.to_string());
    match s.split_once(':') {
      Some((host, container)) => Ok(Self {
        host: parse_port(host).map_err(|_| invalid())?,
        container: parse_port(container).map_err(|_| invalid())?,
      }),
      None => {
        let port = parse_port(s).map_err(|_| invalid())?;
        Ok(Self {
          host: port,
          container: port,
        })
      }
    }
  }
}

impl fmt::Display for PortBinding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.container)
  }
}

/// Run-time adjustments applied on top of the image's launch config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOverrides {
  /// Replaces the entrypoint entirely.
  pub command: Option<Vec<String>>,
  pub bindings: Vec<PortBinding>,
  pub env: BTreeMap<String, String>,
}

/// A fully resolved process description. Never started by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
  pub command: Vec<String>,
  pub work_dir: String,
  pub env: BTreeMap<String, String>,
  /// Exposed ports plus every bound container port.
  pub ports: BTreeSet<u16>,
  pub bindings: Vec<PortBinding>,
}
