use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Barrier;

use strata_lib::cache::{CacheKey, CacheStatus, LayerCache};
use strata_lib::filesystem::Blob;
use strata_lib::snapshot::Snapshot;
use strata_lib::store::StoreError;

fn layer(name: &str) -> Snapshot {
  let mut snapshot = Snapshot::empty();
  snapshot.filesystem.insert(format!("/layers/{}", name), Blob::new(name));
  snapshot
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_compute_once() {
  let cache = Arc::new(LayerCache::unbounded());
  let runs = Arc::new(AtomicUsize::new(0));
  let barrier = Arc::new(Barrier::new(8));
  let key = CacheKey::from_hex("shared");

  let mut handles = Vec::new();
  for _ in 0..8 {
    let cache = cache.clone();
    let runs = runs.clone();
    let barrier = barrier.clone();
    let key = key.clone();
    handles.push(tokio::spawn(async move {
      barrier.wait().await;
      cache
        .get_or_compute(&key, || async {
          runs.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok::<_, StoreError>(layer("shared"))
        })
        .await
        .unwrap()
    }));
  }

  let mut computed = 0;
  let mut digests = Vec::new();
  for handle in handles {
    let (snapshot, status) = handle.await.unwrap();
    if status == CacheStatus::Computed {
      computed += 1;
    }
    digests.push(snapshot.digest().unwrap());
  }

  assert_eq!(runs.load(Ordering::SeqCst), 1);
  assert_eq!(computed, 1);
  assert!(digests.windows(2).all(|w| w[0] == w[1]));
  assert_eq!(cache.stats().hits, 7);
}

#[tokio::test]
async fn eviction_skips_pinned_layers() {
  let cache = LayerCache::new(Some(2));
  let oldest = CacheKey::from_hex("oldest");
  let lease = cache.pin(&oldest);

  for name in ["oldest", "middle", "newest"] {
    cache
      .get_or_compute(&CacheKey::from_hex(name), || async { Ok::<_, StoreError>(layer(name)) })
      .await
      .unwrap();
  }

  assert!(cache.contains(&oldest), "pinned layer must survive");
  assert!(!cache.contains(&CacheKey::from_hex("middle")));
  assert!(cache.contains(&CacheKey::from_hex("newest")));
  assert_eq!(cache.stats().evictions, 1);

  drop(lease);
  assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn failed_computation_is_retried() {
  let cache = LayerCache::unbounded();
  let key = CacheKey::from_hex("flaky");

  let err = cache
    .get_or_compute(&key, || async { Err::<Snapshot, _>(StoreError::NotFound(CacheKey::from_hex("flaky"))) })
    .await;
  assert!(err.is_err());
  assert!(!cache.contains(&key));

  let (_, status) = cache
    .get_or_compute(&key, || async { Ok::<_, StoreError>(layer("flaky")) })
    .await
    .unwrap();
  assert_eq!(status, CacheStatus::Computed);
}
