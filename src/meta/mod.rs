//! Job metadata store
//!
//! One record per job tracks which inputs exist, which stage outputs have
//! been produced and which artifacts are durably uploaded. The flags are
//! the only state the dependency resolver consults; artifact presence on
//! disk is never re-derived on the hot path.
//!
//! # Record lifecycle
//!
//! | Event | Effect |
//! |-------|--------|
//! | first access | zero-valued record created |
//! | eviction (not fetched) | artifacts deleted, record kept |
//! | all outputs + uploads done | artifacts purged, record kept |
//! | results fetched | expiry scheduled after `fetched_ttl` |
//! | expiry / eviction (fetched) | record purged |

pub mod eviction;
pub mod record;
pub mod store;

pub use eviction::EvictionReport;
pub use record::{JobField, JobRecord};
pub use store::MetaStore;
