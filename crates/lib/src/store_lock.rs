//! Advisory lock over the layer store.
//!
//! Builds take the lock shared, so several can write layers at once. Garbage
//! collection takes it exclusively because it deletes files a running build
//! may be about to reference. The exclusive holder records itself in the
//! lock file so a blocked process can say who it is waiting for.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Who holds the exclusive lock, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  pub acquired_at_unix: u64,
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let acquired = UNIX_EPOCH + Duration::from_secs(self.acquired_at_unix);
    write!(
      f,
      "{} (pid {}, since {})",
      self.command,
      self.pid,
      humantime::format_rfc3339_seconds(acquired)
    )
  }
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error("layer store is busy: held by {}\nremove {} if no strata process is running", holder_label(.holder), .lock_path.display())]
  Busy {
    holder: Option<LockHolder>,
    lock_path: PathBuf,
  },

  #[error("failed to open lock file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {path}: {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record lock holder in {path}: {source}")]
  Record {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn holder_label(holder: &Option<LockHolder>) -> String {
  holder
    .as_ref()
    .map(ToString::to_string)
    .unwrap_or_else(|| "an unknown process".to_string())
}

impl StoreLockError {
  pub fn kind(&self) -> ErrorKind {
    ErrorKind::Storage
  }
}

/// A held store lock, released when dropped.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl StoreLock {
  pub fn shared(store: &Path, command: &str) -> Result<Self, StoreLockError> {
    Self::acquire(store, LockMode::Shared, command)
  }

  pub fn exclusive(store: &Path, command: &str) -> Result<Self, StoreLockError> {
    Self::acquire(store, LockMode::Exclusive, command)
  }

  /// Take the lock without waiting. Creates the store directory if needed.
  pub fn acquire(store: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    let path = store.join(LOCK_FILENAME);
    let open_err = |source| StoreLockError::Open {
      path: path.clone(),
      source,
    };
    std::fs::create_dir_all(store).map_err(open_err)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(open_err)?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(StoreLockError::Busy {
          holder: read_holder(&path),
          lock_path: path,
        });
      }
      Err(source) => return Err(StoreLockError::Lock { path, source }),
    }

    let lock = Self { file, path, mode };
    if mode == LockMode::Exclusive {
      lock.record(command)?;
    }
    debug!(path = %lock.path.display(), ?mode, command, "store locked");
    Ok(lock)
  }

  fn record(&self, command: &str) -> Result<(), StoreLockError> {
    let holder = LockHolder {
      pid: std::process::id(),
      command: command.to_string(),
      acquired_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0),
    };
    let record_err = |source| StoreLockError::Record {
      path: self.path.clone(),
      source,
    };

    let content = serde_json::to_vec(&holder).map_err(|e| record_err(io::Error::other(e)))?;
    let mut file = &self.file;
    file.set_len(0).map_err(record_err)?;
    file.seek(SeekFrom::Start(0)).map_err(record_err)?;
    file.write_all(&content).map_err(record_err)?;
    file.flush().map_err(record_err)
  }

  /// The recorded exclusive holder, if any.
  pub fn holder(&self) -> Option<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    serde_json::from_str(&content).ok()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
  let content = std::fs::read(path).ok()?;
  serde_json::from_slice(&content).ok()
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file, operation).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: the handle stays open for the call and a zeroed OVERLAPPED is valid.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };
  if locked != 0 {
    return Ok(());
  }

  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::Error::from(io::ErrorKind::WouldBlock));
  }
  Err(err)
}
