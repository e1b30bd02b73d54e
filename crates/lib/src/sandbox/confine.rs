//! Confinement of sandboxed commands to their materialized root.
//!
//! On Linux the child process is moved into the root between `fork()` and
//! `exec()`. An unprivileged caller first enters a fresh user namespace that
//! maps its own ids to root, which is what makes `chroot` permitted. Other
//! platforms have no equivalent here and refuse to run commands.
//!
//! The hook runs in a restricted context: only async-signal-safe syscalls on
//! buffers prepared beforehand. No allocation, no locks, no logging.

use std::path::Path;

use tokio::process::Command;

use super::SandboxError;

#[cfg(target_os = "linux")]
pub(super) use linux::Jail;

#[cfg(not(target_os = "linux"))]
pub(super) use unsupported::Jail;

#[cfg(target_os = "linux")]
mod linux {
  use std::ffi::{CStr, CString};
  use std::io;
  use std::os::unix::ffi::OsStrExt;

  use rustix::fs::{Mode, OFlags};
  use rustix::process;
  use rustix::thread::{self, UnshareFlags};

  use super::*;

  /// Id maps written into a new user namespace, precomputed.
  struct IdMaps {
    uid: Vec<u8>,
    gid: Vec<u8>,
  }

  pub(in crate::sandbox) struct Jail {
    root: CString,
    work_dir: CString,
    id_maps: Option<IdMaps>,
  }

  impl Jail {
    pub(in crate::sandbox) fn new(root: &Path, work_dir: &str) -> Result<Self, SandboxError> {
      let nul = |what: &str| SandboxError::Unavailable(format!("{} contains a NUL byte", what));
      let root = CString::new(root.as_os_str().as_bytes()).map_err(|_| nul("sandbox root"))?;
      let work_dir = CString::new(work_dir).map_err(|_| nul("working directory"))?;

      let id_maps = if process::geteuid().is_root() {
        None
      } else {
        Some(IdMaps {
          uid: format!("0 {} 1", process::geteuid().as_raw()).into_bytes(),
          gid: format!("0 {} 1", process::getegid().as_raw()).into_bytes(),
        })
      };

      Ok(Self {
        root,
        work_dir,
        id_maps,
      })
    }

    pub(in crate::sandbox) fn install(self, command: &mut Command) {
      // SAFETY: `enter` only issues raw syscalls on buffers owned by the closure.
      unsafe {
        command.pre_exec(move || self.enter());
      }
    }

    fn enter(&self) -> io::Result<()> {
      if let Some(maps) = &self.id_maps {
        // SAFETY: the child is single threaded between fork and exec.
        unsafe { thread::unshare_unsafe(UnshareFlags::NEWUSER)? };
        write_proc(c"/proc/self/setgroups", b"deny")?;
        write_proc(c"/proc/self/uid_map", &maps.uid)?;
        write_proc(c"/proc/self/gid_map", &maps.gid)?;
      }
      process::chroot(self.root.as_c_str())?;
      process::chdir(self.work_dir.as_c_str())?;
      Ok(())
    }
  }

  fn write_proc(path: &CStr, contents: &[u8]) -> io::Result<()> {
    let fd = rustix::fs::open(path, OFlags::WRONLY | OFlags::CLOEXEC, Mode::empty())?;
    rustix::io::write(&fd, contents)?;
    Ok(())
  }
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
  use std::convert::Infallible;

  use super::*;

  pub(in crate::sandbox) struct Jail(Infallible);

  impl Jail {
    pub(in crate::sandbox) fn new(_root: &Path, _work_dir: &str) -> Result<Self, SandboxError> {
      Err(SandboxError::Unavailable(
        "confined command execution requires Linux".to_string(),
      ))
    }

    pub(in crate::sandbox) fn install(self, _command: &mut Command) {
      match self.0 {}
    }
  }
}
