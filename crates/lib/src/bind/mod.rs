//! Launch binder: turns a built image into a process specification.
//!
//! Binding is pure. Exposed ports are documentation, so a port nobody binds
//! is only logged, and nothing here starts a process.

mod types;

use tracing::debug;

pub use types::*;

/// Resolve the command, environment and ports for launching `launch`.
pub fn bind(launch: impl Into<LaunchConfig>, overrides: &LaunchOverrides) -> Result<ProcessSpec, BindError> {
  let launch = launch.into();

  let command = match &overrides.command {
    Some(command) if !command.is_empty() => command.clone(),
    _ => match launch.entrypoint {
      Some(entrypoint) if !entrypoint.is_empty() => entrypoint,
      _ => return Err(BindError::NoEntrypoint),
    },
  };

  let mut env = launch.env;
  env.extend(overrides.env.iter().map(|(k, v)| (k.clone(), v.clone())));

  let mut bindings = overrides.bindings.clone();
  bindings.sort();
  bindings.dedup();

  let mut ports = launch.exposed_ports.clone();
  ports.extend(bindings.iter().map(|b| b.container));

  for port in &launch.exposed_ports {
    if !bindings.iter().any(|b| b.container == *port) {
      debug!(port, "exposed port has no host binding");
    }
  }

  Ok(ProcessSpec {
    command,
    work_dir: launch.work_dir,
    env,
    ports,
    bindings,
  })
}
