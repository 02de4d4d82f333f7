//! leafcache - node-local compute cache for the LeafScan pipeline
//!
//! Tracks per-job artifacts and metadata, decides when a pipeline stage can
//! (re)run, evicts data under a byte budget and synchronizes finished
//! artifacts to the remote store.

pub mod artifact;
pub mod cache;
pub mod cli;
pub mod config;
pub mod deps;
pub mod error;
pub mod meta;
pub mod pipeline;
pub mod ui;
pub mod upload;

#[cfg(test)]
mod testing;

pub use error::{LeafError, LeafResult};
