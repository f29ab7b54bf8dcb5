//! `benchdash dashboard` / `benchdash export`

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use benchdash_client::{DashboardConfig, DashboardHandle, DashboardState, WsConnector};
use benchdash_protocol::RunStatus;
use console::{style, Term};

use crate::{render, Context, Filters};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn spawn(ctx: &Context, filters: &Filters, live: bool) -> Result<DashboardHandle> {
    let config = DashboardConfig {
        live: if live { Some(ctx.live()?) } else { None },
        refetch_interval: ctx.config.list_poll_interval(),
        query: filters.query(),
    };
    Ok(DashboardHandle::spawn(
        ctx.api()?,
        Arc::new(WsConnector),
        config,
    ))
}

pub async fn run(ctx: &Context, filters: &Filters, live: bool) -> Result<()> {
    let handle = spawn(ctx, filters, live && ctx.config.dashboard_live)?;
    let term = Term::stdout();
    let mut changes = handle.subscribe();
    let mut last_revision = None;

    loop {
        let state = handle.state();
        if last_revision != Some(state.revision) {
            last_revision = Some(state.revision);
            let _ = term.clear_screen();
            print_dashboard(&state);
        }

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn print_dashboard(state: &DashboardState) {
    let mut header = format!(
        "{}  {} running  {} queued  {} failed",
        style("benchdash").bold(),
        state.count_by_status(RunStatus::Running),
        state.count_by_status(RunStatus::Queued),
        state.count_by_status(RunStatus::Failed),
    );
    if let Some(status) = state.connection {
        header.push_str("  ");
        header.push_str(&render::connection(status, state.reconnect_attempts));
    }
    println!("{header}");

    if let Some(err) = &state.last_error {
        println!("{}", render::api_error(err));
    }
    if !state.loaded {
        println!("{}", style("Loading...").dim());
    } else if state.runs.is_empty() {
        println!("No runs.");
    } else {
        println!("{}", render::runs_table(&state.runs, |id| state.is_selected(id)));
    }
    println!("{}", style("Ctrl-C to quit").dim());
}

/// Print the chosen runs (or every listed run) as a JSON array.
pub async fn export(ctx: &Context, run_ids: Vec<String>, filters: &Filters) -> Result<ExitCode> {
    let handle = spawn(ctx, filters, false)?;
    let state = tokio::time::timeout(
        LOAD_TIMEOUT,
        handle.wait_until(|s| s.loaded || s.last_error.is_some()),
    )
    .await;
    let state = match state {
        Ok(state) if state.loaded => state,
        Ok(state) => {
            handle.shutdown().await;
            match &state.last_error {
                Some(err) => bail!("{}", err.presentation().message),
                None => bail!("run list unavailable"),
            }
        }
        Err(_) => {
            handle.shutdown().await;
            bail!("timed out loading runs");
        }
    };

    let requested = crate::unique(run_ids);
    let selection = if requested.is_empty() {
        state.runs.iter().map(|r| r.run_id.clone()).collect()
    } else {
        requested.clone()
    };
    let applied = handle.select(selection).await;
    handle.shutdown().await;
    let Some(applied) = applied else {
        bail!("dashboard stopped before the selection was applied");
    };
    let exported = applied.selected();
    let missing: Vec<&String> = requested
        .iter()
        .filter(|id| applied.get(id).is_none())
        .collect();

    println!("{}", serde_json::to_string_pretty(&exported)?);
    for run_id in &missing {
        eprintln!("{run_id}: not in the run list");
    }
    Ok(if missing.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
