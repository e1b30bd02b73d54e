use std::time::Instant;

use anyhow::{Context, Result};

use strata_lib::config::BuildConfig;
use strata_lib::gc::collect_garbage;
use strata_lib::image::ImageStore;
use strata_lib::store::LayerStore;
use strata_lib::store_lock::StoreLock;

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let config = BuildConfig::from_env()?;

  let _lock = StoreLock::exclusive(&config.store_dir, "strata gc").context("Failed to acquire store lock")?;

  let images = ImageStore::new(config.images_dir.clone());
  let store = LayerStore::new(config.store_dir.clone());
  let result = collect_garbage(&images, &store, dry_run)?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Layers removed", &result.stats.layers_deleted.to_string());
    print_stat("Blobs removed", &result.stats.blobs_deleted.to_string());
    print_stat("Manifests removed", &result.stats.manifests_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
