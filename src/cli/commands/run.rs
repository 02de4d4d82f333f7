//! Run command - submit inputs for a job and run its stages

use super::{drain, finish, open, status::print_status};
use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::error::{LeafError, LeafResult};
use crate::pipeline::{JobParams, Pipeline};
use crate::ui::{self, UiContext};
use std::sync::Arc;
use tokio::fs;

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> LeafResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open(config).await?;
    let outcome = submit(&ctx, &pipeline, args).await;
    finish(&pipeline, outcome).await
}

async fn submit(ctx: &UiContext, pipeline: &Arc<Pipeline>, args: RunArgs) -> LeafResult<()> {
    let params = JobParams {
        leaf_number: args.leaf_number,
        leaf_widths: (!args.leaf_widths.is_empty()).then_some(args.leaf_widths),
        length: args.length,
    };

    ui::section(ctx, &format!("Job {}", args.entry));

    if !params.is_empty() {
        let changed = pipeline.submit_params(&args.entry, &params).await?;
        if changed.is_empty() {
            ui::step_info(ctx, "Parameters unchanged");
        } else {
            let names: Vec<String> = changed.iter().map(ToString::to_string).collect();
            ui::step_ok_detail(ctx, "Parameters recorded", &names.join(", "));
        }
    }

    if let Some(ref path) = args.video {
        let video = fs::read(path)
            .await
            .map_err(|e| LeafError::io(format!("reading {}", path.display()), e))?;
        if pipeline.submit_video(&args.entry, &video).await? {
            ui::step_ok_detail(ctx, "Video stored", &ui::format_bytes(video.len() as u64));
        } else {
            ui::step_info(ctx, "Video unchanged");
        }
    }

    if params.is_empty() && args.video.is_none() {
        ui::step_warn_hint(
            ctx,
            "Nothing submitted",
            "Pass --video, --leaf-number, --leaf-widths or --length",
        );
    }

    drain(ctx, pipeline).await;
    if !pipeline.resume(&args.entry)?.is_empty() {
        drain(ctx, pipeline).await;
    }

    match pipeline.status(&args.entry).await? {
        Some(status) => print_status(ctx, &status),
        None => ui::remark(ctx, "No job recorded"),
    }

    Ok(())
}
