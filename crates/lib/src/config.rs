//! Build configuration resolved from the environment.
//!
//! | variable                  | default                         |
//! |---------------------------|---------------------------------|
//! | `STRATA_DATA`             | `$XDG_DATA_HOME/strata`         |
//! | `STRATA_STORE`            | `<data>/store`                  |
//! | `STRATA_BASES`            | `<data>/bases`                  |
//! | `STRATA_COMMAND_TIMEOUT`  | `30m` (`0` or `off` disables)   |
//! | `STRATA_CACHE_CAPACITY`   | `256` layers (`0` is unbounded) |
//! | `STRATA_SANDBOX_PATH`     | `/usr/local/bin:/usr/bin:/bin`  |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::execute::ExecutorConfig;
use crate::platform::paths::{bases_dir, images_dir, store_dir};
use crate::sandbox::HostRunner;

pub const COMMAND_TIMEOUT_ENV: &str = "STRATA_COMMAND_TIMEOUT";
pub const CACHE_CAPACITY_ENV: &str = "STRATA_CACHE_CAPACITY";
pub const SANDBOX_PATH_ENV: &str = "STRATA_SANDBOX_PATH";

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value {value:?} for {var}: {reason}")]
  InvalidValue {
    var: &'static str,
    value: String,
    reason: String,
  },
}

impl ConfigError {
  pub fn kind(&self) -> ErrorKind {
    ErrorKind::InvalidArguments
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
  pub store_dir: PathBuf,
  pub images_dir: PathBuf,
  pub bases_dir: PathBuf,
  pub command_timeout: Option<Duration>,
  pub cache_capacity: Option<usize>,
  pub sandbox_path: String,
}

impl BuildConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let command_timeout = match std::env::var(COMMAND_TIMEOUT_ENV) {
      Ok(raw) => parse_timeout(&raw).map_err(|reason| ConfigError::InvalidValue {
        var: COMMAND_TIMEOUT_ENV,
        value: raw.clone(),
        reason,
      })?,
      Err(_) => Some(DEFAULT_COMMAND_TIMEOUT),
    };

    let cache_capacity = match std::env::var(CACHE_CAPACITY_ENV) {
      Ok(raw) => match raw.trim().parse::<usize>() {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(e) => {
          return Err(ConfigError::InvalidValue {
            var: CACHE_CAPACITY_ENV,
            value: raw,
            reason: e.to_string(),
          });
        }
      },
      Err(_) => Some(DEFAULT_CACHE_CAPACITY),
    };

    let sandbox_path = std::env::var(SANDBOX_PATH_ENV)
      .ok()
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| HostRunner::new().path().to_string());

    Ok(Self {
      store_dir: store_dir(),
      images_dir: images_dir(),
      bases_dir: bases_dir(),
      command_timeout,
      cache_capacity,
      sandbox_path,
    })
  }

  pub fn executor_config(&self) -> ExecutorConfig {
    ExecutorConfig::default().with_command_timeout(self.command_timeout)
  }

  pub fn runner(&self) -> HostRunner {
    HostRunner::new().with_path(self.sandbox_path.clone())
  }
}

/// Parse a humantime duration. `0`, `off` and `none` disable the timeout.
pub fn parse_timeout(raw: &str) -> Result<Option<Duration>, String> {
  match raw.trim() {
    "0" | "off" | "none" => Ok(None),
    value => humantime::parse_duration(value).map(Some).map_err(|e| e.to_string()),
  }
}
