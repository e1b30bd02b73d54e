//! Host process runner.
//!
//! Materializes the snapshot's filesystem into a fresh temporary root and
//! runs the command confined to it: the process is chrooted into the root
//! (inside a new user namespace when the caller is unprivileged) and starts
//! in the working directory. Only programs present in the image can run, and
//! writes to absolute paths land in the root, never on the host. The tree is
//! read back once the process exits. Where confinement cannot be set up the
//! run fails with [`SandboxError::Unavailable`] instead of running unconfined.
//!
//! The environment is rebuilt from scratch:
//! - all inherited variables are cleared
//! - `PATH` is the runner's configured search path, resolved inside the image
//! - `HOME` is `/homeless-shelter`
//! - `TMPDIR`, `TMP`, `TEMP` point at `/tmp`, which is not committed
//! - `SOURCE_DATE_EPOCH` is pinned for reproducible timestamps
//! - the image's declared env is applied last

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::confine::Jail;
use super::{SandboxError, SandboxOutcome, SandboxRequest, SandboxRunner};
use crate::consts::SOURCE_DATE_EPOCH;
use crate::filesystem::{Blob, Filesystem, join_path, resolve_path};

pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Exit code reported when the program cannot be found, as a shell would.
const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the program exists but cannot be executed.
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Scratch directory inside the root. Writes there are discarded.
const SCRATCH_DIR: &str = "/tmp";

#[derive(Debug, Clone)]
pub struct HostRunner {
  path: String,
}

impl Default for HostRunner {
  fn default() -> Self {
    Self::new()
  }
}

impl HostRunner {
  pub fn new() -> Self {
    Self {
      path: DEFAULT_SANDBOX_PATH.to_string(),
    }
  }

  /// Override the `PATH` commands are resolved against inside the image.
  pub fn with_path(mut self, path: impl Into<String>) -> Self {
    self.path = path.into();
    self
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

impl SandboxRunner for HostRunner {
  async fn run(&self, request: SandboxRequest<'_>) -> Result<SandboxOutcome, SandboxError> {
    let Some((program, args)) = request.command.split_first() else {
      return Err(SandboxError::Unavailable("empty command".to_string()));
    };

    let root = tempfile::Builder::new().prefix("strata-root-").tempdir()?;
    let root_path = root.path().to_path_buf();
    let jail = Jail::new(&root_path, request.work_dir)?;

    {
      let root_path = root_path.clone();
      let work_dir = request.work_dir.to_string();
      let filesystem = request.filesystem.clone();
      tokio::task::spawn_blocking(move || materialize(&root_path, &filesystem, &work_dir))
        .await
        .map_err(|e| SandboxError::Unavailable(e.to_string()))??;
    }

    let search_path = request.env.get("PATH").map(String::as_str).unwrap_or(&self.path);
    let Some(executable) = resolve_program(&root_path, search_path, request.work_dir, program) else {
      debug!(program = %program, "program not found in image");
      return Ok(SandboxOutcome {
        exit_code: Some(EXIT_NOT_FOUND),
        filesystem: request.filesystem.clone(),
      });
    };

    info!(command = %request.command.join(" "), work_dir = %request.work_dir, "running command");

    let mut command = Command::new(&executable);
    command
      .args(args)
      .env_clear()
      .env("PATH", &self.path)
      .env("HOME", "/homeless-shelter")
      .env("TMPDIR", SCRATCH_DIR)
      .env("TMP", SCRATCH_DIR)
      .env("TEMP", SCRATCH_DIR)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .stdin(Stdio::null())
      .kill_on_drop(true);
    for (key, value) in request.env {
      command.env(key, value);
    }
    jail.install(&mut command);

    let output = match command.output().await {
      Ok(output) => output,
      Err(e) if is_not_executable(&e) => {
        debug!(program = %executable, error = %e, "program not executable");
        return Ok(SandboxOutcome {
          exit_code: Some(EXIT_NOT_EXECUTABLE),
          filesystem: request.filesystem.clone(),
        });
      }
      Err(e) => {
        return Err(SandboxError::Unavailable(format!("failed to confine {}: {}", program, e)));
      }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
      debug!(stdout = %stdout.trim_end(), "command stdout");
    }
    if !stderr.is_empty() {
      debug!(stderr = %stderr.trim_end(), "command stderr");
    }

    let exit_code = output.status.code();
    if exit_code != Some(0) {
      return Ok(SandboxOutcome {
        exit_code,
        filesystem: request.filesystem.clone(),
      });
    }

    let mut filesystem = tokio::task::spawn_blocking(move || capture(&root_path))
      .await
      .map_err(|e| SandboxError::Unavailable(e.to_string()))??;
    for (path, blob) in request.filesystem.iter().filter(|(path, _)| is_scratch(path)) {
      filesystem.insert(path, blob.clone());
    }

    Ok(SandboxOutcome { exit_code, filesystem })
  }
}

/// Locate `program` inside the materialized image, returning its path as
/// seen from inside the root.
///
/// A name with a `/` is taken relative to the working directory; a bare name
/// is searched for along `search_path`. Paths are resolved lexically, so
/// nothing outside `root` is ever considered.
fn resolve_program(root: &Path, search_path: &str, work_dir: &str, program: &str) -> Option<String> {
  let candidates: Vec<String> = if program.contains('/') {
    vec![resolve_path(work_dir, program)]
  } else {
    search_path
      .split(':')
      .filter(|dir| !dir.is_empty())
      .map(|dir| join_path(&resolve_path(work_dir, dir), program))
      .collect()
  };

  candidates
    .into_iter()
    .find(|candidate| host_path(root, candidate).is_file())
}

fn host_path(root: &Path, image_path: &str) -> PathBuf {
  root.join(image_path.trim_start_matches('/'))
}

fn is_scratch(path: &str) -> bool {
  path
    .strip_prefix(SCRATCH_DIR)
    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(unix)]
fn is_not_executable(err: &io::Error) -> bool {
  use rustix::io::Errno;
  matches!(Errno::from_io_error(err), Some(Errno::ACCESS | Errno::NOEXEC))
}

#[cfg(not(unix))]
fn is_not_executable(err: &io::Error) -> bool {
  err.kind() == io::ErrorKind::PermissionDenied
}

/// Write every file under `root`. Modes are not tracked in snapshots, so
/// files are made executable to let image binaries run.
fn materialize(root: &Path, filesystem: &Filesystem, work_dir: &str) -> io::Result<()> {
  for (path, blob) in filesystem.iter() {
    let target = host_path(root, path);
    if let Some(parent) = target.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, blob.data())?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
    }
  }
  std::fs::create_dir_all(host_path(root, work_dir))?;
  std::fs::create_dir_all(host_path(root, SCRATCH_DIR))?;
  Ok(())
}

/// Read every regular file under `root` back into a filesystem.
/// Symlinks, special files and the scratch directory are not captured.
fn capture(root: &Path) -> io::Result<Filesystem> {
  let mut filesystem = Filesystem::new();
  let scratch = host_path(root, SCRATCH_DIR);
  let walk = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| entry.path() != scratch);
  for entry in walk {
    let entry = entry?;
    let file_type = entry.file_type();
    if file_type.is_dir() {
      continue;
    }
    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let path = rel
      .components()
      .map(|c| c.as_os_str().to_string_lossy().into_owned())
      .collect::<Vec<_>>()
      .join("/");
    if !file_type.is_file() {
      debug!(path = %path, "not capturing non-regular file");
      continue;
    }
    let data = std::fs::read(entry.path())?;
    filesystem.insert(format!("/{}", path), Blob::new(data));
  }
  Ok(filesystem)
}
