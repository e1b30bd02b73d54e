//! Layer cache: memoized snapshots keyed by cumulative step hashes.
//!
//! A [`CacheKey`] identifies a plan prefix: it hashes the parent key, the
//! step descriptor and, for steps that read outside the snapshot (a base image
//! or the build context), the digest of what they read. Two plans sharing a
//! prefix share keys, and any change to a step or its inputs yields a new
//! key, so entries never need invalidating.
//!
//! Each key owns a [`tokio::sync::OnceCell`]. Concurrent callers asking for
//! the same key wait on the same cell and the computation runs at most once;
//! a failed computation leaves the cell empty for the next caller.
//!
//! With a [`LayerStore`] attached, misses first try the on-disk layer and
//! freshly computed layers are written through.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::snapshot::Snapshot;
use crate::step::StepDescriptor;
use crate::store::{LayerStore, StoreError};
use crate::util::hash::{ContentHash, HashError, Hashable};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
  parent: &'a str,
  step: &'a StepDescriptor,
  input: Option<&'a ContentHash>,
}

impl Hashable for KeyMaterial<'_> {}

impl CacheKey {
  /// Parent key of the first step in every plan.
  pub fn root() -> Self {
    Self(String::new())
  }

  pub fn from_hex(hex: impl Into<String>) -> Self {
    Self(hex.into())
  }

  /// Key of `step` applied on top of `parent`, given the digest of the base
  /// image or build-context files the step reads.
  pub fn derive(parent: &CacheKey, step: &StepDescriptor, input: Option<&ContentHash>) -> Result<Self, HashError> {
    let material = KeyMaterial {
      parent: &parent.0,
      step,
      input,
    };
    Ok(Self(material.content_hash()?.0))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// How a layer was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
  /// Already in memory.
  Hit,
  /// Loaded from the layer store.
  Restored,
  /// Produced by running the step.
  Computed,
}

impl CacheStatus {
  /// True unless the step had to run.
  pub fn is_cached(&self) -> bool {
    !matches!(self, CacheStatus::Computed)
  }
}

impl fmt::Display for CacheStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheStatus::Hit => f.write_str("cached"),
      CacheStatus::Restored => f.write_str("restored"),
      CacheStatus::Computed => f.write_str("built"),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub entries: usize,
  pub hits: u64,
  pub restored: u64,
  pub computed: u64,
  pub evictions: u64,
}

struct Entry {
  cell: Arc<OnceCell<Snapshot>>,
  last_used: u64,
  pins: usize,
}

impl Entry {
  fn new(clock: u64) -> Self {
    Self {
      cell: Arc::new(OnceCell::new()),
      last_used: clock,
      pins: 0,
    }
  }

  /// Someone other than the map holds the cell while it is still empty.
  fn in_flight(&self) -> bool {
    !self.cell.initialized() && Arc::strong_count(&self.cell) > 1
  }
}

#[derive(Default)]
struct State {
  entries: HashMap<CacheKey, Entry>,
  clock: u64,
}

impl State {
  fn tick(&mut self) -> u64 {
    self.clock += 1;
    self.clock
  }
}

pub struct LayerCache {
  state: Mutex<State>,
  capacity: Option<usize>,
  store: Option<LayerStore>,
  hits: AtomicU64,
  restored: AtomicU64,
  computed: AtomicU64,
  evictions: AtomicU64,
}

impl LayerCache {
  /// A cache holding at most `capacity` layers in memory, or unbounded.
  pub fn new(capacity: Option<usize>) -> Self {
    Self {
      state: Mutex::new(State::default()),
      capacity,
      store: None,
      hits: AtomicU64::new(0),
      restored: AtomicU64::new(0),
      computed: AtomicU64::new(0),
      evictions: AtomicU64::new(0),
    }
  }

  pub fn unbounded() -> Self {
    Self::new(None)
  }

  /// Write layers through to `store` and consult it on misses.
  pub fn with_store(mut self, store: LayerStore) -> Self {
    self.store = Some(store);
    self
  }

  pub fn store(&self) -> Option<&LayerStore> {
    self.store.as_ref()
  }

  pub fn capacity(&self) -> Option<usize> {
    self.capacity
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn cell(&self, key: &CacheKey) -> Arc<OnceCell<Snapshot>> {
    let mut state = self.lock();
    let clock = state.tick();
    let entry = state.entries.entry(key.clone()).or_insert_with(|| Entry::new(clock));
    entry.last_used = clock;
    entry.cell.clone()
  }

  /// Return the snapshot for `key`, running `compute` only if no snapshot
  /// is cached in memory or in the attached store.
  pub async fn get_or_compute<F, Fut, E>(&self, key: &CacheKey, compute: F) -> Result<(Snapshot, CacheStatus), E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Snapshot, E>>,
    E: From<StoreError>,
  {
    let cell = self.cell(key);
    let mut status = CacheStatus::Hit;
    let slot = &mut status;
    let store = self.store.as_ref();

    let snapshot = cell
      .get_or_try_init(move || async move {
        if let Some(store) = store
          && let Some(snapshot) = store.load_blocking(key).await?
        {
          *slot = CacheStatus::Restored;
          return Ok(snapshot);
        }
        let snapshot = compute().await?;
        if let Some(store) = store {
          store.save_blocking(key, &snapshot).await?;
        }
        *slot = CacheStatus::Computed;
        Ok::<Snapshot, E>(snapshot)
      })
      .await?
      .clone();
    drop(cell);

    let counter = match status {
      CacheStatus::Hit => &self.hits,
      CacheStatus::Restored => &self.restored,
      CacheStatus::Computed => &self.computed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    debug!(key = %key.short(), status = %status, "layer resolved");

    self.evict();
    Ok((snapshot, status))
  }

  /// The snapshot for `key` if it is already in memory.
  pub fn get(&self, key: &CacheKey) -> Option<Snapshot> {
    let mut state = self.lock();
    let clock = state.tick();
    let entry = state.entries.get_mut(key)?;
    let snapshot = entry.cell.get()?.clone();
    entry.last_used = clock;
    Some(snapshot)
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.lock().entries.get(key).is_some_and(|e| e.cell.initialized())
  }

  /// Number of layers held in memory.
  pub fn len(&self) -> usize {
    self.lock().entries.values().filter(|e| e.cell.initialized()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Protect `key` from eviction until the lease is dropped.
  pub fn pin(&self, key: &CacheKey) -> LayerLease<'_> {
    let mut state = self.lock();
    let clock = state.tick();
    let entry = state.entries.entry(key.clone()).or_insert_with(|| Entry::new(clock));
    entry.pins += 1;
    LayerLease {
      cache: self,
      key: key.clone(),
    }
  }

  fn unpin(&self, key: &CacheKey) {
    {
      let mut state = self.lock();
      if let Some(entry) = state.entries.get_mut(key) {
        entry.pins = entry.pins.saturating_sub(1);
      }
    }
    self.evict();
  }

  /// Drop idle empty cells, then least-recently-used layers until the
  /// cache fits its capacity. Pinned and in-flight entries are kept.
  fn evict(&self) {
    let mut state = self.lock();
    state
      .entries
      .retain(|_, e| e.cell.initialized() || e.pins > 0 || Arc::strong_count(&e.cell) > 1);

    let Some(capacity) = self.capacity else {
      return;
    };

    loop {
      let live = state.entries.values().filter(|e| e.cell.initialized()).count();
      if live <= capacity {
        break;
      }
      let victim = state
        .entries
        .iter()
        .filter(|(_, e)| e.cell.initialized() && e.pins == 0 && !e.in_flight())
        .min_by_key(|(_, e)| e.last_used)
        .map(|(k, _)| k.clone());
      let Some(victim) = victim else {
        debug!(live, capacity, "all layers pinned, cache over capacity");
        break;
      };
      state.entries.remove(&victim);
      self.evictions.fetch_add(1, Ordering::Relaxed);
      debug!(key = %victim.short(), "evicted layer");
    }
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      entries: self.len(),
      hits: self.hits.load(Ordering::Relaxed),
      restored: self.restored.load(Ordering::Relaxed),
      computed: self.computed.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
    }
  }
}

impl fmt::Debug for LayerCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LayerCache")
      .field("capacity", &self.capacity)
      .field("store", &self.store.as_ref().map(LayerStore::root))
      .field("stats", &self.stats())
      .finish()
  }
}

/// Keeps a layer pinned in the cache while held.
#[must_use = "the layer is unpinned as soon as the lease is dropped"]
pub struct LayerLease<'a> {
  cache: &'a LayerCache,
  key: CacheKey,
}

impl LayerLease<'_> {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }
}

impl Drop for LayerLease<'_> {
  fn drop(&mut self) {
    self.cache.unpin(&self.key);
  }
}
