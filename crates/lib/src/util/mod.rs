//! Shared utilities.
//!
//! Content hashing used across the crate, plus test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
