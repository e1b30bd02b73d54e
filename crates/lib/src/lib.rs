//! strata-lib: layered image build executor
//!
//! This crate provides the pipeline behind the `strata` command:
//! - `step` / `plan`: step descriptors and the validated build plan
//! - `execute`: the stage executor that applies one step to a snapshot
//! - `cache` / `store`: the layer cache and its on-disk backing store
//! - `build`: the builder threading snapshots through the plan
//! - `bind`: the launch binder producing a process specification
//! - `image`: image manifests and the local tag index

pub mod base;
pub mod bind;
pub mod build;
pub mod cache;
pub mod config;
pub mod consts;
pub mod context;
pub mod error;
pub mod execute;
pub mod filesystem;
pub mod gc;
pub mod image;
pub mod plan;
pub mod platform;
pub mod recipe;
pub mod sandbox;
pub mod snapshot;
pub mod step;
pub mod store;
pub mod store_lock;
pub mod util;
