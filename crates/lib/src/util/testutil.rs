//! Test utilities for strata-lib.
//!
//! [`FakeRunner`] interprets a tiny command vocabulary against the
//! in-memory filesystem so executor and builder tests never spawn processes:
//!
//! - `write <path> <content>` writes a file relative to the work dir
//! - `pip install -r <file>` writes `/site-packages/<line>` per requirement
//! - `fail <code>` exits with `code`
//! - `sleep <millis>` sleeps, then succeeds
//!
//! Anything else exits with 127.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::filesystem::{Blob, resolve_path};
use crate::sandbox::{SandboxError, SandboxOutcome, SandboxRequest, SandboxRunner};

#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
  calls: Arc<AtomicUsize>,
}

impl FakeRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of commands run so far, shared across clones.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl SandboxRunner for FakeRunner {
  async fn run(&self, request: SandboxRequest<'_>) -> Result<SandboxOutcome, SandboxError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let mut filesystem = request.filesystem.clone();
    let args: Vec<&str> = request.command.iter().map(String::as_str).collect();

    let exit_code = match args.as_slice() {
      ["write", path, content] => {
        filesystem.insert(resolve_path(request.work_dir, path), Blob::new(*content));
        0
      }
      ["pip", "install", "-r", file] => {
        let Some(requirements) = filesystem.get(&resolve_path(request.work_dir, file)).cloned() else {
          return Ok(SandboxOutcome {
            exit_code: Some(1),
            filesystem: request.filesystem.clone(),
          });
        };
        for line in String::from_utf8_lossy(requirements.data()).lines() {
          let name = line.trim();
          if !name.is_empty() {
            filesystem.insert(format!("/site-packages/{}", name), Blob::new(name));
          }
        }
        0
      }
      ["fail", code] => code.parse().unwrap_or(1),
      ["sleep", millis] => {
        tokio::time::sleep(Duration::from_millis(millis.parse().unwrap_or(0))).await;
        0
      }
      _ => 127,
    };

    if exit_code != 0 {
      return Ok(SandboxOutcome {
        exit_code: Some(exit_code),
        filesystem: request.filesystem.clone(),
      });
    }
    Ok(SandboxOutcome {
      exit_code: Some(0),
      filesystem,
    })
  }
}
