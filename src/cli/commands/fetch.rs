//! Fetch command - request the defoliation result

use super::{drain, finish, open};
use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::LeafResult;
use crate::pipeline::{Pipeline, ResultOutcome};
use crate::ui::{self, UiContext};
use std::sync::Arc;

/// Execute the fetch command
///
/// A queued answer means this process just scheduled the work, so the
/// pools are drained and the request repeated once.
pub async fn execute(args: FetchArgs, config: &Config) -> LeafResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open(config).await?;
    let result = fetch(&ctx, &pipeline, &args).await;
    finish(&pipeline, result).await
}

async fn fetch(ctx: &UiContext, pipeline: &Arc<Pipeline>, args: &FetchArgs) -> LeafResult<()> {
    let mut outcome = pipeline.request_result(&args.entry).await?;
    if let ResultOutcome::Queued { .. } = outcome {
        if !args.json {
            print_outcome(ctx, &outcome);
        }
        drain(ctx, pipeline).await;
        outcome = pipeline.request_result(&args.entry).await?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(ctx, &outcome);
    }

    Ok(())
}

fn print_outcome(ctx: &UiContext, outcome: &ResultOutcome) {
    match outcome {
        ResultOutcome::Completed {
            defoliation,
            expires_at,
        } => {
            ui::step_ok(ctx, &format!("Defoliation {defoliation:.2}%"));
            ui::key_value(ctx, "expires", &expires_at.to_rfc3339());
        }
        ResultOutcome::Queued { stages, jobs_ahead } => {
            let names: Vec<String> = stages.iter().map(ToString::to_string).collect();
            ui::step_info(
                ctx,
                &format!("Queued {} ({jobs_ahead} jobs ahead)", names.join(", ")),
            );
        }
        ResultOutcome::Waiting { missing, reupload } => {
            let fields: Vec<String> = missing.iter().map(ToString::to_string).collect();
            let routes: Vec<String> = reupload.iter().map(ToString::to_string).collect();
            ui::step_warn_hint(
                ctx,
                &format!("Waiting on {}", fields.join(", ")),
                &format!("re-upload: {}", routes.join(", ")),
            );
        }
    }
}
