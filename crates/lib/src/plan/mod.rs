//! Build planner: validates a descriptor list and freezes it into a plan.
//!
//! Planning happens before any stage runs, so every error here aborts the
//! build without side effects. The plan keeps declaration order exactly;
//! [`BuildPlan::commutes`] only reports which neighbours could be swapped.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{BuildContext, ContextError, ContextPath};
use crate::error::ErrorKind;
use crate::filesystem::resolve_path;
use crate::snapshot::ROOT_DIR;
use crate::step::{ArgumentError, StepAction, StepDescriptor, StepKind};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("plan has no SetBase step")]
  EmptyPlan,

  #[error("step {index}: {source}")]
  InvalidArguments {
    index: usize,
    #[source]
    source: ArgumentError,
  },

  #[error("step {index}: source {path:?} escapes the build context")]
  InvalidContext { index: usize, path: String },

  #[error("step {index}: {source}")]
  Context {
    index: usize,
    #[source]
    source: ContextError,
  },
}

impl PlanError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PlanError::EmptyPlan => ErrorKind::EmptyPlan,
      PlanError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
      PlanError::InvalidContext { .. } => ErrorKind::InvalidContext,
      PlanError::Context { .. } => ErrorKind::Storage,
    }
  }

  /// Declaration index of the offending step, if any.
  pub fn index(&self) -> Option<usize> {
    match self {
      PlanError::EmptyPlan => None,
      PlanError::InvalidArguments { index, .. }
      | PlanError::InvalidContext { index, .. }
      | PlanError::Context { index, .. } => Some(*index),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
  /// Several `SetEntrypoint` steps; only `effective` applies.
  EntrypointOverridden { overridden: Vec<usize>, effective: usize },
}

impl fmt::Display for PlanWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PlanWarning::EntrypointOverridden { overridden, effective } => {
        let list: Vec<String> = overridden.iter().map(ToString::to_string).collect();
        write!(
          f,
          "entrypoint at step {} overrides step(s) {}",
          effective,
          list.join(", ")
        )
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
  /// Position in the original descriptor list.
  pub index: usize,
  pub descriptor: StepDescriptor,
  copy_dest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
  steps: Vec<PlannedStep>,
  warnings: Vec<PlanWarning>,
  exposed_ports: BTreeSet<u16>,
}

impl BuildPlan {
  pub fn steps(&self) -> &[PlannedStep] {
    &self.steps
  }

  pub fn warnings(&self) -> &[PlanWarning] {
    &self.warnings
  }

  /// Union of every `ExposePort` step.
  pub fn exposed_ports(&self) -> &BTreeSet<u16> {
    &self.exposed_ports
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Whether steps `i` and `i + 1` could run in either order with the same
  /// result: both copy from the context and their destinations do not
  /// overlap. Nothing is ever reordered.
  pub fn commutes(&self, i: usize) -> bool {
    let (Some(a), Some(b)) = (self.steps.get(i), self.steps.get(i + 1)) else {
      return false;
    };
    match (&a.copy_dest, &b.copy_dest) {
      (Some(x), Some(y)) => !overlaps(x, y),
      _ => false,
    }
  }
}

fn overlaps(a: &str, b: &str) -> bool {
  let within = |inner: &str, outer: &str| {
    outer == ROOT_DIR || inner == outer || inner.strip_prefix(outer).is_some_and(|rest| rest.starts_with('/'))
  };
  within(a, b) || within(b, a)
}

/// Validate `descriptors` against `context` and produce an execution plan.
pub fn plan(descriptors: Vec<StepDescriptor>, context: &dyn BuildContext) -> Result<BuildPlan, PlanError> {
  if !descriptors.iter().any(|d| d.kind() == StepKind::SetBase) {
    return Err(PlanError::EmptyPlan);
  }

  let mut steps = Vec::with_capacity(descriptors.len());
  let mut exposed_ports = BTreeSet::new();
  let mut entrypoints = Vec::new();
  let mut work_dir = ROOT_DIR.to_string();

  for (index, descriptor) in descriptors.into_iter().enumerate() {
    let action = descriptor
      .action()
      .map_err(|source| PlanError::InvalidArguments { index, source })?;

    let mut copy_dest = None;
    match action {
      StepAction::SetBase(_) => work_dir = ROOT_DIR.to_string(),
      StepAction::SetWorkDir(path) => work_dir = resolve_path(ROOT_DIR, path),
      StepAction::CopyFiles { sources, dest } => {
        check_sources(index, sources, context)?;
        copy_dest = Some(resolve_path(&work_dir, dest));
      }
      StepAction::ExposePort(ports) => exposed_ports.extend(ports),
      StepAction::SetEntrypoint(_) => entrypoints.push(index),
      StepAction::RunCommand(_) | StepAction::SetEnv(_) => {}
    }

    steps.push(PlannedStep {
      index,
      descriptor,
      copy_dest,
    });
  }

  let mut warnings = Vec::new();
  if let Some((&effective, overridden)) = entrypoints.split_last()
    && !overridden.is_empty()
  {
    let warning = PlanWarning::EntrypointOverridden {
      overridden: overridden.to_vec(),
      effective,
    };
    warn!(effective, overridden = ?overridden, "{}", warning);
    warnings.push(warning);
  }

  debug!(steps = steps.len(), ports = exposed_ports.len(), "plan ready");
  Ok(BuildPlan {
    steps,
    warnings,
    exposed_ports,
  })
}

/// Reject sources that leave the context, lexically or through a link on
/// disk. Missing sources are left for the executor to report.
fn check_sources(index: usize, sources: &[String], context: &dyn BuildContext) -> Result<(), PlanError> {
  let escapes = |path: &str| PlanError::InvalidContext {
    index,
    path: path.to_string(),
  };

  for raw in sources {
    let path = ContextPath::parse(raw).map_err(|_| escapes(raw))?;
    match context.check(&path) {
      Ok(()) => {}
      Err(ContextError::Escapes { .. }) => return Err(escapes(raw)),
      Err(source) => return Err(PlanError::Context { index, source }),
    }
  }
  Ok(())
}
