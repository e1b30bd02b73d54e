use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Overrides the data directory.
pub const DATA_ENV: &str = "STRATA_DATA";
/// Overrides the layer store directory.
pub const STORE_ENV: &str = "STRATA_STORE";
/// Overrides the base image directory.
pub const BASES_ENV: &str = "STRATA_BASES";

fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Some(dir) = env_path(DATA_ENV) {
    return dir;
  }
  env_path("LOCALAPPDATA").unwrap_or_else(home_dir).join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Some(dir) = env_path(DATA_ENV) {
    return dir;
  }
  let data_home = env_path("XDG_DATA_HOME").unwrap_or_else(|| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Persisted layers and blobs.
pub fn store_dir() -> PathBuf {
  env_path(STORE_ENV).unwrap_or_else(|| data_dir().join("store"))
}

/// Image manifests and the tag index.
pub fn images_dir() -> PathBuf {
  data_dir().join("images")
}

/// Unpacked base image filesystems.
pub fn bases_dir() -> PathBuf {
  env_path(BASES_ENV).unwrap_or_else(|| data_dir().join("bases"))
}
