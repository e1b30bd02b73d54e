use std::sync::Arc;

use tempfile::TempDir;

use strata_lib::base::LocalBaseStore;
use strata_lib::build::Builder;
use strata_lib::cache::{CacheStatus, LayerCache};
use strata_lib::context::MemoryContext;
use strata_lib::execute::{ExecutorConfig, StageExecutor};
use strata_lib::gc::collect_garbage;
use strata_lib::image::ImageStore;
use strata_lib::plan::plan;
use strata_lib::step::StepDescriptor;
use strata_lib::store::LayerStore;

use super::common::{FakeRunner, builder, service_context, service_steps};

#[tokio::test]
async fn fresh_cache_restores_persisted_layers() {
  let temp = TempDir::new().unwrap();
  let store = LayerStore::new(temp.path().join("store"));

  let context = service_context("app = 'v1'");
  let plan = plan(service_steps(), &context).unwrap();

  let first_cache = Arc::new(LayerCache::unbounded().with_store(store.clone()));
  let first = builder(context.clone(), first_cache, FakeRunner::default())
    .build(&plan)
    .await
    .unwrap();
  assert_eq!(store.layer_keys().unwrap().len(), 7);

  let runner = FakeRunner::default();
  let second_cache = Arc::new(LayerCache::unbounded().with_store(store));
  let second = builder(context, second_cache.clone(), runner.clone())
    .build(&plan)
    .await
    .unwrap();

  assert!(second.layers.iter().all(|l| l.status == CacheStatus::Restored));
  assert_eq!(runner.calls(), 0);
  assert_eq!(first.snapshot, second.snapshot);
  assert_eq!(second_cache.stats().restored, 7);
}

#[tokio::test]
async fn gc_keeps_tagged_image_and_drops_stale_layers() {
  let temp = TempDir::new().unwrap();
  let store = LayerStore::new(temp.path().join("store"));
  let images = ImageStore::new(temp.path().join("images"));
  let cache = Arc::new(LayerCache::unbounded().with_store(store.clone()));

  let old_context = service_context("app = 'v1'");
  let old_plan = plan(service_steps(), &old_context).unwrap();
  let old = builder(old_context, cache.clone(), FakeRunner::default())
    .build(&old_plan)
    .await
    .unwrap();
  images.save("web", &old.manifest().unwrap()).unwrap();

  let new_context = service_context("app = 'v2'");
  let new_plan = plan(service_steps(), &new_context).unwrap();
  let new = builder(new_context, cache, FakeRunner::default())
    .build(&new_plan)
    .await
    .unwrap();
  let new_id = images.save("web", &new.manifest().unwrap()).unwrap();

  let preview = collect_garbage(&images, &store, true).unwrap();
  assert_eq!(preview.stats.layers_deleted, 3);
  assert_eq!(store.layer_keys().unwrap().len(), 10);

  let result = collect_garbage(&images, &store, false).unwrap();
  assert_eq!(result.stats.layers_deleted, 3);
  assert!(result.stats.blobs_deleted >= 1, "old main.py blob is unreachable");
  assert_eq!(result.stats.manifests_deleted, 1);

  let (id, manifest) = images.resolve("web").unwrap();
  assert_eq!(id, new_id);
  for key in &manifest.layers {
    assert!(store.load(key).unwrap().is_some(), "live layer {} was collected", key.short());
  }
}

#[tokio::test]
async fn changed_base_image_is_rebuilt_not_restored() {
  let temp = TempDir::new().unwrap();
  let bases = temp.path().join("bases");
  let version_file = bases.join("py").join("1").join("etc").join("version");
  std::fs::create_dir_all(version_file.parent().unwrap()).unwrap();
  let store = LayerStore::new(temp.path().join("store"));

  let steps = vec![
    StepDescriptor::set_base("py:1"),
    StepDescriptor::set_work_dir("/app"),
  ];
  let context = MemoryContext::new();
  let plan = plan(steps, &context).unwrap();

  let build = |version: &str| {
    std::fs::write(&version_file, version).unwrap();
    let executor = StageExecutor::new(
      Arc::new(LocalBaseStore::new(&bases)),
      Arc::new(context.clone()),
      FakeRunner::default(),
      ExecutorConfig::default(),
    );
    Builder::new(executor, Arc::new(LayerCache::unbounded().with_store(store.clone())))
  };

  let first = build("v1").build(&plan).await.unwrap();
  assert_eq!(first.snapshot.filesystem.get("/etc/version").unwrap().data(), b"v1");

  let second = build("v2").build(&plan).await.unwrap();
  assert!(second.layers.iter().all(|l| l.status == CacheStatus::Computed));
  assert_eq!(second.snapshot.filesystem.get("/etc/version").unwrap().data(), b"v2");
  assert_ne!(first.top_key(), second.top_key());

  let third = build("v2").build(&plan).await.unwrap();
  assert!(third.layers.iter().all(|l| l.status == CacheStatus::Restored));
}
