//! Builder: threads a snapshot through every planned step.
//!
//! Each step's layer is looked up in the [`LayerCache`] under the key
//! derived from its parent; only misses reach the [`StageExecutor`]. Keys
//! touched by the build stay pinned until it finishes, so a concurrent
//! build cannot evict the layers this one is standing on.

mod types;

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

pub use types::*;

use crate::cache::{CacheKey, CacheStatus, LayerCache, LayerLease};
use crate::execute::StageExecutor;
use crate::plan::{BuildPlan, PlannedStep};
use crate::sandbox::SandboxRunner;
use crate::snapshot::Snapshot;

pub struct Builder<R> {
  executor: StageExecutor<R>,
  cache: Arc<LayerCache>,
}

impl<R: SandboxRunner> Builder<R> {
  pub fn new(executor: StageExecutor<R>, cache: Arc<LayerCache>) -> Self {
    Self { executor, cache }
  }

  pub fn executor(&self) -> &StageExecutor<R> {
    &self.executor
  }

  pub fn cache(&self) -> &Arc<LayerCache> {
    &self.cache
  }

  /// Execute `plan` in declaration order.
  pub async fn build(&self, plan: &BuildPlan) -> Result<BuildOutcome, BuildError> {
    let started = Instant::now();
    let mut parent = CacheKey::root();
    let mut snapshot = Snapshot::empty();
    let mut layers = Vec::with_capacity(plan.len());
    let mut leases = Vec::with_capacity(plan.len());

    for step in plan.steps() {
      let index = step.index;
      let kind = step.descriptor.kind();
      let input = std::mem::take(&mut snapshot);

      let (key, next, status) = match self.layer(step, &parent, input, &mut leases).await {
        Ok(resolved) => resolved,
        Err(e) => {
          warn!(index, kind = %kind, error = %e, "step failed");
          return Err(e);
        }
      };

      info!(index, kind = %kind, key = %key.short(), status = %status, "step complete");
      layers.push(LayerReport {
        index,
        kind,
        key: key.clone(),
        status,
      });
      snapshot = next;
      parent = key;
    }

    let outcome = BuildOutcome {
      snapshot,
      layers,
      warnings: plan.warnings().to_vec(),
      elapsed: started.elapsed(),
    };
    info!(
      layers = outcome.layers.len(),
      cached = outcome.cache_hits(),
      elapsed = ?outcome.elapsed,
      "build finished"
    );
    drop(leases);
    Ok(outcome)
  }

  /// Resolve one step's layer. The step's external input is read once; its
  /// digest goes into the key and, on a miss, the same bytes are applied.
  async fn layer<'a>(
    &'a self,
    step: &PlannedStep,
    parent: &CacheKey,
    snapshot: Snapshot,
    leases: &mut Vec<LayerLease<'a>>,
  ) -> Result<(CacheKey, Snapshot, CacheStatus), BuildError> {
    let index = step.index;
    let descriptor = &step.descriptor;
    let kind = descriptor.kind();
    let step_err = |source| BuildError::Step { index, kind, source };

    let input = self.executor.load(descriptor).map_err(step_err)?;
    let digest = input.digest().map_err(|source| BuildError::Hash { index, source })?;
    let key =
      CacheKey::derive(parent, descriptor, digest.as_ref()).map_err(|source| BuildError::Hash { index, source })?;
    leases.push(self.cache.pin(&key));

    let executor = &self.executor;
    let (next, status) = self
      .cache
      .get_or_compute(&key, move || async move {
        executor
          .apply_loaded(snapshot, descriptor, input)
          .await
          .map_err(step_err)
      })
      .await?;
    Ok((key, next, status))
  }
}
