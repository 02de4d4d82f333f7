//! CLI command implementations
//!
//! Every command assembles a [`Pipeline`], restores the metadata snapshot,
//! acts, then writes the snapshot back so the next invocation sees the
//! same jobs. The snapshot is written even when the command fails, since
//! artifacts may already have changed on disk.

pub mod clear;
pub mod config;
pub mod fetch;
pub mod gc;
pub mod reset;
pub mod run;
pub mod status;

pub use clear::execute as clear;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use gc::execute as gc;
pub use reset::execute as reset;
pub use run::execute as run;
pub use status::execute as status;

use crate::config::Config;
use crate::error::LeafResult;
use crate::pipeline::Pipeline;
use crate::ui::{TaskSpinner, UiContext};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the pipeline and restore saved job metadata
async fn open(config: &Config) -> LeafResult<Arc<Pipeline>> {
    let pipeline = Pipeline::build(config).await?;
    pipeline.load_state().await?;

    let purged = pipeline.meta().purge_expired().await?;
    if purged > 0 {
        info!(purged, "Expired jobs purged");
    }
    Ok(pipeline)
}

/// Drain both worker pools behind a spinner
async fn drain(ctx: &UiContext, pipeline: &Pipeline) {
    let mut spinner = TaskSpinner::new(ctx);
    spinner.start("Running stages and uploads...");
    pipeline.wait_idle().await;
    spinner.stop("Pipeline idle");
}

/// Let queued work finish and persist metadata whatever the outcome
///
/// The command's own error takes precedence over a failed save.
async fn finish(pipeline: &Pipeline, outcome: LeafResult<()>) -> LeafResult<()> {
    pipeline.wait_idle().await;
    let saved = pipeline.save_state().await;
    match outcome {
        Ok(()) => saved,
        Err(e) => {
            if let Err(save) = saved {
                warn!(error = %save, "Saving metadata after a failed command failed");
            }
            Err(e)
        }
    }
}
