//! Stage executor: applies one step descriptor to a snapshot.
//!
//! [`StageExecutor::apply`] is the only place snapshots change. It consumes
//! the parent snapshot and returns the child, or an error without any
//! partial result. Given identical inputs and collaborators the output is
//! identical.

mod types;

use std::sync::Arc;

use tracing::{debug, info};

pub use types::*;

use crate::base::{BaseStore, ImageRef};
use crate::context::{BuildContext, ContextFile, ContextPath};
use crate::filesystem::{Blob, Filesystem, is_absolute, join_path, resolve_path};
use crate::sandbox::{SandboxRequest, SandboxRunner};
use crate::snapshot::Snapshot;
use crate::step::{StepAction, StepDescriptor};

pub struct StageExecutor<R> {
  bases: Arc<dyn BaseStore>,
  context: Arc<dyn BuildContext>,
  runner: R,
  config: ExecutorConfig,
}

impl<R: SandboxRunner> StageExecutor<R> {
  pub fn new(bases: Arc<dyn BaseStore>, context: Arc<dyn BuildContext>, runner: R, config: ExecutorConfig) -> Self {
    Self {
      bases,
      context,
      runner,
      config,
    }
  }

  pub fn context(&self) -> &dyn BuildContext {
    self.context.as_ref()
  }

  pub fn runner(&self) -> &R {
    &self.runner
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Read the external input `step` depends on: the base image for
  /// `SetBase`, the context files for `CopyFiles`.
  pub fn load(&self, step: &StepDescriptor) -> Result<StepInput, StepError> {
    match step.action()? {
      StepAction::SetBase(reference) => self.fetch_base(&reference).map(StepInput::Base),
      StepAction::CopyFiles { sources, .. } => self.read_sources(sources).map(StepInput::Context),
      _ => Ok(StepInput::None),
    }
  }

  /// Apply `step` to `snapshot`, producing the next snapshot.
  pub async fn apply(&self, snapshot: Snapshot, step: &StepDescriptor) -> Result<Snapshot, StepError> {
    let input = self.load(step)?;
    self.apply_loaded(snapshot, step, input).await
  }

  /// Apply `step` using an input previously returned by [`StageExecutor::load`].
  pub async fn apply_loaded(
    &self,
    mut snapshot: Snapshot,
    step: &StepDescriptor,
    input: StepInput,
  ) -> Result<Snapshot, StepError> {
    debug!(step = %step, "applying step");

    match step.action()? {
      StepAction::SetBase(reference) => {
        let filesystem = match input {
          StepInput::Base(filesystem) => filesystem,
          _ => self.fetch_base(&reference)?,
        };
        Ok(Snapshot::from_base(filesystem))
      }
      StepAction::SetWorkDir(path) => {
        if !is_absolute(path) {
          return Err(StepError::InvalidPath {
            path: path.to_string(),
            reason: "working directory must be absolute".to_string(),
          });
        }
        snapshot.work_dir = resolve_path("/", path);
        Ok(snapshot)
      }
      StepAction::CopyFiles { sources, dest } => {
        let read = match input {
          StepInput::Context(read) => read,
          _ => self.read_sources(sources)?,
        };
        snapshot.filesystem = copy_files(&snapshot, read, sources.len(), dest);
        Ok(snapshot)
      }
      StepAction::RunCommand(command) => {
        snapshot.filesystem = self.run_command(&snapshot, command).await?;
        Ok(snapshot)
      }
      StepAction::ExposePort(ports) => {
        snapshot.exposed_ports.extend(ports);
        Ok(snapshot)
      }
      StepAction::SetEntrypoint(command) => {
        snapshot.entrypoint = Some(command.to_vec());
        Ok(snapshot)
      }
      StepAction::SetEnv(pairs) => {
        snapshot.env.extend(pairs);
        Ok(snapshot)
      }
    }
  }

  fn fetch_base(&self, reference: &ImageRef) -> Result<Filesystem, StepError> {
    let filesystem = self.bases.fetch(reference).map_err(|source| StepError::BaseNotFound {
      reference: reference.to_string(),
      source,
    })?;
    info!(reference = %reference, files = filesystem.len(), "base image loaded");
    Ok(filesystem)
  }

  /// Read every source up front so a missing one fails the step before
  /// anything is copied.
  fn read_sources(&self, sources: &[String]) -> Result<Vec<(ContextPath, Vec<ContextFile>)>, StepError> {
    let mut read = Vec::with_capacity(sources.len());
    for source in sources {
      let path = ContextPath::parse(source)?;
      self.context.check(&path)?;
      let files = self.context.read(&path)?;
      read.push((path, files));
    }
    Ok(read)
  }

  async fn run_command(&self, snapshot: &Snapshot, command: &[String]) -> Result<Filesystem, StepError> {
    let request = SandboxRequest {
      command,
      filesystem: &snapshot.filesystem,
      work_dir: &snapshot.work_dir,
      env: &snapshot.env,
    };

    let run = self.runner.run(request);
    let result = match self.config.command_timeout {
      Some(limit) => match tokio::time::timeout(limit, run).await {
        Ok(result) => result,
        Err(_) => {
          return Err(StepError::CommandTimeout {
            command: command.join(" "),
            timeout: limit,
          });
        }
      },
      None => run.await,
    };

    let outcome = result?;
    if !outcome.success() {
      return Err(StepError::CommandFailed {
        command: command.join(" "),
        exit_code: outcome.exit_code,
      });
    }
    Ok(outcome.filesystem)
  }
}

fn copy_files(snapshot: &Snapshot, read: Vec<(ContextPath, Vec<ContextFile>)>, sources: usize, dest: &str) -> Filesystem {
  let dest_path = resolve_path(&snapshot.work_dir, dest);
  let into_dir = dest.ends_with('/')
    || dest == "."
    || dest.ends_with("/.")
    || sources > 1
    || snapshot.filesystem.is_dir(&dest_path);

  let mut filesystem = snapshot.filesystem.clone();
  let mut copied = 0usize;
  for (path, files) in read {
    for file in files {
      let target = if !file.path.is_empty() {
        join_path(&dest_path, &file.path)
      } else if into_dir {
        join_path(&dest_path, path.file_name().unwrap_or_default())
      } else {
        dest_path.clone()
      };
      filesystem.insert(target, Blob::new(file.data));
      copied += 1;
    }
  }

  debug!(sources, files = copied, dest = %dest_path, "copied files");
  filesystem
}
