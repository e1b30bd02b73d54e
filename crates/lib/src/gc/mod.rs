//! Garbage collection of the layer store.
//!
//! Tagged images are the roots. Every layer a tagged manifest lists is live,
//! and every blob a live layer references is live; everything else in the
//! store is deleted. Manifests no tag points at are pruned as well.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::CacheKey;
use crate::image::{ImageError, ImageStore};
use crate::store::{LayerStore, StoreError};
use crate::util::hash::ContentHash;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read image index: {0}")]
  Images(#[from] ImageError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct GcStats {
  pub layers_scanned: usize,
  pub layers_deleted: usize,
  pub blobs_scanned: usize,
  pub blobs_deleted: usize,
  pub manifests_deleted: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.layers_deleted + self.blobs_deleted + self.manifests_deleted
  }
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_layers: Vec<CacheKey>,
  pub deleted_blobs: Vec<ContentHash>,
  pub dry_run: bool,
}

fn collect_live_layers(images: &ImageStore) -> Result<HashSet<CacheKey>, GcError> {
  let mut live = HashSet::new();
  for manifest in images.tagged_manifests()? {
    live.extend(manifest.layers);
  }
  debug!(count = live.len(), "collected live layers from tagged images");
  Ok(live)
}

/// Delete unreachable layers and blobs. With `dry_run` nothing is removed
/// but the result reports what would be.
pub fn collect_garbage(images: &ImageStore, store: &LayerStore, dry_run: bool) -> Result<GcResult, GcError> {
  let live_layers = collect_live_layers(images)?;

  let mut stats = GcStats::default();
  let mut deleted_layers = Vec::new();
  let mut live_blobs = HashSet::new();

  for key in store.layer_keys()? {
    stats.layers_scanned += 1;

    if live_layers.contains(&key) {
      match store.record(&key) {
        Ok(layer) => live_blobs.extend(layer.snapshot.files.into_values()),
        Err(e) => warn!(key = %key.short(), error = %e, "live layer is unreadable"),
      }
      continue;
    }

    stats.bytes_freed += if dry_run {
      store.layer_size(&key)
    } else {
      store.remove_layer(&key)?
    };
    stats.layers_deleted += 1;
    debug!(key = %key.short(), dry_run, "layer unreachable");
    deleted_layers.push(key);
  }

  let mut deleted_blobs = Vec::new();
  for digest in store.blob_digests()? {
    stats.blobs_scanned += 1;
    if live_blobs.contains(&digest) {
      continue;
    }
    stats.bytes_freed += if dry_run {
      store.blob_size(&digest)
    } else {
      store.remove_blob(&digest)?
    };
    stats.blobs_deleted += 1;
    deleted_blobs.push(digest);
  }

  if !dry_run {
    stats.manifests_deleted = images.prune_untagged()?;
  }

  info!(
    layers_deleted = stats.layers_deleted,
    blobs_deleted = stats.blobs_deleted,
    bytes_freed = stats.bytes_freed,
    dry_run,
    "garbage collection complete"
  );

  Ok(GcResult {
    stats,
    deleted_layers,
    deleted_blobs,
    dry_run,
  })
}
