//! `benchdash runs`, `cancel` and `delete`.

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use benchdash_client::{DeleteReport, RunsApi};
use console::style;

use crate::{render, Context, Filters};

pub async fn list(ctx: &Context, filters: &Filters, json: bool) -> Result<()> {
    let runs = ctx
        .rest()?
        .list_runs(&filters.query())
        .await
        .context("Failed to list runs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }
    println!("{}", render::runs_table(&runs, |_| false));
    Ok(())
}

pub async fn cancel(ctx: &Context, run_id: &str) -> Result<()> {
    ctx.rest()?
        .cancel_run(run_id)
        .await
        .with_context(|| format!("Failed to cancel {run_id}"))?;
    println!("Cancel requested for {}", style(run_id).bold());
    Ok(())
}

pub async fn delete(ctx: &Context, run_ids: Vec<String>) -> Result<ExitCode> {
    let api = ctx.rest()?;
    let run_ids = crate::unique(run_ids);

    // A single delete gets the server's reason on failure.
    if let [run_id] = run_ids.as_slice() {
        return Ok(match api.delete_run(run_id).await {
            Ok(()) => {
                println!("Deleted {}", style(run_id).bold());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{run_id}: {}", render::api_error(&e));
                ExitCode::FAILURE
            }
        });
    }

    let report = DeleteReport::from(
        api.bulk_delete_runs(&run_ids)
            .await
            .context("Failed to delete runs")?,
    );
    for line in render::delete_report(&report) {
        println!("{line}");
    }
    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
