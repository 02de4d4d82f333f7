//! Clear command - wipe the local cache

use super::{finish, open};
use crate::cli::args::ClearArgs;
use crate::config::Config;
use crate::error::LeafResult;
use crate::pipeline::Pipeline;
use crate::ui::{self, UiContext};

/// Execute the clear command
pub async fn execute(args: ClearArgs, config: &Config) -> LeafResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open(config).await?;
    let outcome = clear(&ctx, &pipeline, &args, config).await;
    finish(&pipeline, outcome).await
}

async fn clear(ctx: &UiContext, pipeline: &Pipeline, args: &ClearArgs, config: &Config) -> LeafResult<()> {
    pipeline.clear(args.remote).await?;
    ui::step_ok(ctx, "Local cache cleared");
    if args.remote {
        ui::step_ok_detail(ctx, "Remote store reset", &config.upload.remote_url);
    }

    Ok(())
}
