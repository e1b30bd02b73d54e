//! Implementation of the `strata build` command.
//!
//! Loads the recipe, plans it against the build context, runs the plan
//! through the layer cache and tags the resulting image.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use strata_lib::base::LocalBaseStore;
use strata_lib::build::{Builder, LayerReport};
use strata_lib::cache::LayerCache;
use strata_lib::config::{BuildConfig, ConfigError, parse_timeout};
use strata_lib::consts::RECIPE_FILENAME;
use strata_lib::context::DirContext;
use strata_lib::execute::StageExecutor;
use strata_lib::image::ImageStore;
use strata_lib::plan::{PlanWarning, plan};
use strata_lib::recipe::Recipe;
use strata_lib::store::LayerStore;
use strata_lib::store_lock::StoreLock;
use strata_lib::util::hash::ObjectHash;

use crate::output::{
  OutputFormat, format_duration, print_json, print_layer, print_stat, print_success, print_warning,
};

pub struct BuildArgs {
  pub context: PathBuf,
  pub tag: String,
  pub recipe: Option<PathBuf>,
  pub timeout: Option<String>,
}

#[derive(Serialize)]
struct BuildReport<'a> {
  tag: &'a str,
  id: ObjectHash,
  layers: &'a [LayerReport],
  cached: usize,
  warnings: &'a [PlanWarning],
  elapsed_ms: u128,
}

pub fn cmd_build(args: &BuildArgs, output: OutputFormat) -> Result<()> {
  let mut config = BuildConfig::from_env()?;
  if let Some(raw) = &args.timeout {
    config.command_timeout = parse_timeout(raw).map_err(|reason| ConfigError::InvalidValue {
      var: "--timeout",
      value: raw.clone(),
      reason,
    })?;
  }

  let recipe_path = args
    .recipe
    .clone()
    .unwrap_or_else(|| args.context.join(RECIPE_FILENAME));
  let recipe = Recipe::load(&recipe_path)?;
  let context = DirContext::new(&args.context)?;
  debug!(context = %context.root().display(), recipe = %recipe_path.display(), "loaded recipe");

  let plan = plan(recipe.steps, &context)?;
  if !output.is_json() {
    for warning in plan.warnings() {
      print_warning(&warning.to_string());
    }
  }

  let _lock = StoreLock::shared(&config.store_dir, "strata build").context("Failed to acquire store lock")?;

  let cache = LayerCache::new(config.cache_capacity).with_store(LayerStore::new(config.store_dir.clone()));
  let executor = StageExecutor::new(
    Arc::new(LocalBaseStore::new(config.bases_dir.clone())),
    Arc::new(context),
    config.runner(),
    config.executor_config(),
  );
  let builder = Builder::new(executor, Arc::new(cache));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(builder.build(&plan))?;

  let manifest = outcome.manifest().context("Failed to hash image manifest")?;
  let images = ImageStore::new(config.images_dir.clone());
  let id = images.save(&args.tag, &manifest)?;

  if output.is_json() {
    print_json(&BuildReport {
      tag: &args.tag,
      id,
      layers: &outcome.layers,
      cached: outcome.cache_hits(),
      warnings: &outcome.warnings,
      elapsed_ms: outcome.elapsed.as_millis(),
    })?;
  } else {
    for layer in &outcome.layers {
      print_layer(layer.index, layer.kind.as_str(), layer.key.short(), layer.status);
    }
    println!();
    print_success(&format!("Built {}", args.tag));
    print_stat("Image", &id.to_string());
    print_stat(
      "Layers",
      &format!("{} ({} cached)", outcome.layers.len(), outcome.cache_hits()),
    );
    print_stat("Duration", &format_duration(outcome.elapsed));
  }

  Ok(())
}
