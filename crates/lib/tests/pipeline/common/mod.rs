//! Shared fixtures for the pipeline tests.
//!
//! `FakeRunner` understands a handful of commands and applies them to the
//! in-memory filesystem, so these tests never spawn real processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use strata_lib::base::MemoryBaseStore;
use strata_lib::build::Builder;
use strata_lib::cache::LayerCache;
use strata_lib::context::MemoryContext;
use strata_lib::execute::{ExecutorConfig, StageExecutor};
use strata_lib::filesystem::{Blob, Filesystem, resolve_path};
use strata_lib::sandbox::{SandboxError, SandboxOutcome, SandboxRequest, SandboxRunner};
use strata_lib::step::StepDescriptor;

pub const BASE: &str = "python:3.11-slim";

#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
  calls: Arc<AtomicUsize>,
}

impl FakeRunner {
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
      ["pip", "install", "-r", file] => match filesystem.get(&resolve_path(request.work_dir, file)).cloned() {
        Some(requirements) => {
          for line in String::from_utf8_lossy(requirements.data()).lines().map(str::trim) {
            if !line.is_empty() {
              filesystem.insert(format!("/usr/local/lib/site-packages/{}", line), Blob::new(line));
            }
          }
          0
        }
        None => 1,
      },
      ["fail", code] => code.parse().unwrap_or(1),
      ["sleep", millis] => {
        tokio::time::sleep(Duration::from_millis(millis.parse().unwrap_or(0))).await;
        0
      }
      _ => 127,
    };

    let filesystem = if exit_code == 0 {
      filesystem
    } else {
      request.filesystem.clone()
    };
    Ok(SandboxOutcome {
      exit_code: Some(exit_code),
      filesystem,
    })
  }
}

pub fn bases() -> MemoryBaseStore {
  let mut fs = Filesystem::new();
  fs.insert("/usr/local/bin/python3", Blob::new("#!python"));
  fs.insert("/etc/os-release", Blob::new("slim"));
  MemoryBaseStore::new().with_image(BASE, fs)
}

/// A small web service: dependencies plus application code.
pub fn service_context(main: &str) -> MemoryContext {
  MemoryContext::new()
    .with_file("requirements.txt", "fastapi\nuvicorn\n")
    .with_file("main.py", main)
    .with_file("app/routes.py", "routes = []")
}

/// The canonical uvicorn recipe, dependencies installed before the app copy.
pub fn service_steps() -> Vec<StepDescriptor> {
  vec![
    StepDescriptor::set_base(BASE),
    StepDescriptor::set_work_dir("/app"),
    StepDescriptor::copy_files(&["requirements.txt"], "."),
    StepDescriptor::run_command(&["pip", "install", "-r", "requirements.txt"]),
    StepDescriptor::copy_files(&["."], "."),
    StepDescriptor::expose_port(8000),
    StepDescriptor::set_entrypoint(&["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "8000"]),
  ]
}

pub fn builder_with(
  context: MemoryContext,
  cache: Arc<LayerCache>,
  runner: FakeRunner,
  config: ExecutorConfig,
) -> Builder<FakeRunner> {
  let executor = StageExecutor::new(Arc::new(bases()), Arc::new(context), runner, config);
  Builder::new(executor, cache)
}

pub fn builder(context: MemoryContext, cache: Arc<LayerCache>, runner: FakeRunner) -> Builder<FakeRunner> {
  builder_with(context, cache, runner, ExecutorConfig::default())
}
