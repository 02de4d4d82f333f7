//! Gc command - evict down to the byte budget

use super::{finish, open};
use crate::config::Config;
use crate::error::LeafResult;
use crate::pipeline::Pipeline;
use crate::ui::{self, UiContext, UsageLevel};

/// Execute the gc command
pub async fn execute(config: &Config) -> LeafResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open(config).await?;
    let outcome = collect(&ctx, &pipeline).await;
    finish(&pipeline, outcome).await
}

async fn collect(ctx: &UiContext, pipeline: &Pipeline) -> LeafResult<()> {
    let meta = pipeline.meta();

    let report = pipeline.gc().await?;
    if report.is_empty() {
        ui::step_ok(ctx, "Cache within budget, nothing evicted");
    } else {
        ui::step_ok_detail(
            ctx,
            &format!(
                "Evicted {} trimmed, {} purged",
                report.trimmed.len(),
                report.purged.len()
            ),
            &ui::format_bytes(report.freed_bytes),
        );
        for entry in &report.trimmed {
            ui::remark(ctx, &format!("trimmed {entry}"));
        }
        for entry in &report.purged {
            ui::remark(ctx, &format!("purged {entry}"));
        }
    }

    let (used, budget) = (meta.total_bytes(), meta.budget());
    ui::key_value_status(
        ctx,
        "usage",
        &format!(
            "{} / {} ({:.0}%)",
            ui::format_bytes(used),
            ui::format_bytes(budget),
            UsageLevel::percentage(used, budget)
        ),
        UsageLevel::from_usage(used, budget) == UsageLevel::Ok,
    );

    Ok(())
}
