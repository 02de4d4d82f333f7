//! Stage cache
//!
//! Each stage of a job is one JSON artifact holding its parameters, its
//! results and a status. The cache service is the only writer of these
//! artifacts and keeps the job flags consistent with them.
//!
//! # Stage status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | waiting | a declared parameter is null |
//! | ready | every parameter present, not computed |
//! | completed | result stored, upload queued |
//! | failed | last computation raised |
//!
//! Any parameter change clears the results and sends the stage back to
//! `ready` or `waiting`.

pub mod schema;
pub mod service;
pub mod state;

pub use schema::{param_field, Stage, StageSchema};
pub use service::CacheService;
pub use state::{sanitize, sanitize_named, StageState, StageStatus};
