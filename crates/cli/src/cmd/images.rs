//! Implementation of `strata images` and `strata rmi`.

use std::time::{Duration, UNIX_EPOCH};

use anyhow::Result;
use serde_json::json;

use strata_lib::config::BuildConfig;
use strata_lib::image::{ImageError, ImageStore};

use crate::output::{OutputFormat, print_info, print_json, print_success};

pub fn cmd_images(output: OutputFormat) -> Result<()> {
  let config = BuildConfig::from_env()?;
  let images = ImageStore::new(config.images_dir).list()?;

  if output.is_json() {
    return print_json(&images);
  }

  if images.is_empty() {
    print_info("No images. Run 'strata build' to create one.");
    return Ok(());
  }

  println!("{:<32} {:<22} {:>6}  CREATED", "TAG", "ID", "LAYERS");
  for image in &images {
    let created = UNIX_EPOCH + Duration::from_secs(image.created_at_unix);
    println!(
      "{:<32} {:<22} {:>6}  {}",
      image.tag,
      image.id,
      image.layers,
      humantime::format_rfc3339_seconds(created)
    );
  }

  Ok(())
}

pub fn cmd_rmi(tag: &str, output: OutputFormat) -> Result<()> {
  let config = BuildConfig::from_env()?;
  let images = ImageStore::new(config.images_dir);
  if !images.remove_tag(tag)? {
    return Err(ImageError::NotFound(tag.to_string()).into());
  }

  if output.is_json() {
    print_json(&json!({ "untagged": tag }))?;
  } else {
    print_success(&format!("Untagged {}", tag));
    print_info("Run 'strata gc' to reclaim unreferenced layers.");
  }
  Ok(())
}
