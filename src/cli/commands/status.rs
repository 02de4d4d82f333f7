//! Status command - flags and stage states of one job

use super::{finish, open};
use crate::cache::StageStatus;
use crate::cli::args::StatusArgs;
use crate::config::Config;
use crate::error::LeafResult;
use crate::meta::JobField;
use crate::pipeline::{JobStatus, Pipeline};
use crate::ui::{self, UiContext};

/// Execute the status command
pub async fn execute(args: StatusArgs, config: &Config) -> LeafResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open(config).await?;
    // Opening may purge expired jobs
    let outcome = show(&ctx, &pipeline, &args).await;
    finish(&pipeline, outcome).await
}

async fn show(ctx: &UiContext, pipeline: &Pipeline, args: &StatusArgs) -> LeafResult<()> {
    let Some(status) = pipeline.status(&args.entry).await? else {
        ui::step_warn_hint(
            ctx,
            &format!("No job recorded for {}", args.entry),
            "Submit inputs with: leafcache run",
        );
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        ui::section(ctx, &format!("Job {}", args.entry));
        print_status(ctx, &status);
    }
    Ok(())
}

/// Stage table, flags and result of a job
pub(super) fn print_status(ctx: &UiContext, status: &JobStatus) {
    let record = &status.record;

    for (stage, state) in &status.stages {
        let label = stage.to_string();
        match (state.status, state.result_f64(stage.as_str())) {
            (StageStatus::Completed, Some(value)) => {
                ui::step_ok_detail(ctx, &label, &format!("{value:.2}"))
            }
            (StageStatus::Failed, _) => ui::step_error_detail(ctx, &label, "failed"),
            (other, _) => ui::step_info(ctx, &format!("{label}: {other}")),
        }
    }

    let missing: Vec<String> = JobField::inputs()
        .iter()
        .filter(|field| !record.flag(**field))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        ui::step_warn(ctx, &format!("Missing inputs: {}", missing.join(", ")));
    }

    let pending: Vec<String> = JobField::uploads()
        .iter()
        .filter(|field| !record.flag(**field))
        .map(ToString::to_string)
        .collect();
    ui::key_value_status(
        ctx,
        "uploads",
        &if pending.is_empty() {
            "all durable".to_string()
        } else {
            format!("pending {}", pending.join(", "))
        },
        pending.is_empty(),
    );
    ui::key_value(ctx, "bytes", &ui::format_bytes(record.bytes));
    if let Some(value) = record.defoliation_result {
        ui::key_value(ctx, "defoliation", &format!("{value:.2}%"));
    }
    if let Some(at) = record.expires_at {
        ui::key_value(ctx, "expires", &at.to_rfc3339());
    }
}
