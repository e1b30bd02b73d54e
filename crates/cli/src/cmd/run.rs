//! Implementation of the `strata run` command.
//!
//! Resolves the image, binds it with the given overrides and prints the
//! resulting process specification. Starting the process is left to the
//! caller.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use strata_lib::bind::{LaunchOverrides, PortBinding, ProcessSpec, bind};
use strata_lib::config::BuildConfig;
use strata_lib::image::ImageStore;
use strata_lib::util::hash::ObjectHash;

use crate::output::{ARROW, OutputFormat, print_json, print_stat, print_success};

pub struct RunArgs {
  pub image: String,
  pub publish: Vec<PortBinding>,
  pub env: BTreeMap<String, String>,
  pub entrypoint: Option<Vec<String>>,
}

#[derive(Serialize)]
struct RunReport<'a> {
  image: &'a str,
  id: ObjectHash,
  process: ProcessSpec,
}

pub fn cmd_run(args: &RunArgs, output: OutputFormat) -> Result<()> {
  let config = BuildConfig::from_env()?;
  let images = ImageStore::new(config.images_dir);
  let (id, manifest) = images.resolve(&args.image)?;

  let overrides = LaunchOverrides {
    command: args.entrypoint.clone(),
    bindings: args.publish.clone(),
    env: args.env.clone(),
  };
  let process = bind(&manifest, &overrides)?;

  if output.is_json() {
    return print_json(&RunReport {
      image: &args.image,
      id,
      process,
    });
  }

  print_success(&format!("{} ({})", args.image, id));
  print_stat("Command", &process.command.join(" "));
  print_stat("Work dir", &process.work_dir);
  if !process.ports.is_empty() {
    let ports: Vec<String> = process.ports.iter().map(ToString::to_string).collect();
    print_stat("Ports", &ports.join(", "));
  }
  for binding in &process.bindings {
    print_stat(
      "Publish",
      &format!("{} {} {}", binding.host, ARROW, binding.container),
    );
  }
  for (key, value) in &process.env {
    print_stat("Env", &format!("{}={}", key, value));
  }

  Ok(())
}
