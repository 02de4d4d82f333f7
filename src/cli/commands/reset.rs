//! Reset command - drop derived state of a job

use super::{finish, open};
use crate::cli::args::ResetArgs;
use crate::config::Config;
use crate::error::LeafResult;
use crate::pipeline::Pipeline;
use crate::ui::{self, UiContext};

/// Execute the reset command
pub async fn execute(args: ResetArgs, config: &Config) -> LeafResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open(config).await?;
    let outcome = reset(&ctx, &pipeline, &args).await;
    finish(&pipeline, outcome).await
}

async fn reset(ctx: &UiContext, pipeline: &Pipeline, args: &ResetArgs) -> LeafResult<()> {
    pipeline.reset(&args.entry).await?;
    ui::step_ok_detail(ctx, "Job reset", &args.entry);

    Ok(())
}
