//! `benchdash start` / `benchdash watch` - follow one run until it ends.

use std::future;
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use benchdash_client::{
    ConnectionStatus, Phase, RunDetailConfig, RunDetailHandle, RunView, RunsApi, WsConnector,
};
use benchdash_protocol::{RunCreate, RunStatus};
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Sleep;

use crate::{render, Context, StartArgs};

const RETRY_AFTER: Duration = Duration::from_secs(5);

pub async fn start(ctx: &Context, args: StartArgs) -> Result<ExitCode> {
    let request = RunCreate {
        benchmark: args.benchmark,
        model: args.model,
        limit: args.limit,
        temperature: args.temperature,
        epochs: args.epochs,
        ..Default::default()
    };
    let created = ctx
        .rest()?
        .create_run(&request)
        .await
        .context("Failed to start run")?;

    if args.no_watch {
        println!("{}", created.run_id);
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "Started {} ({} on {})",
        style(&created.run_id).bold(),
        request.benchmark,
        request.model
    );
    watch(ctx, created.run_id).await
}

pub async fn watch(ctx: &Context, run_id: String) -> Result<ExitCode> {
    let config = RunDetailConfig {
        live: ctx.live()?,
        poll_interval: ctx.config.poll_interval(),
    };
    let handle = RunDetailHandle::spawn(run_id, ctx.api()?, Arc::new(WsConnector), config);
    let mut changes = handle.subscribe();
    let mut notices = handle.notices();
    let mut printer = Printer::default();
    let mut final_status = None;
    let mut retry: Option<Pin<Box<Sleep>>> = None;

    loop {
        let view = handle.view();
        printer.print(&view);

        match &view.phase {
            Phase::Errored(err) if !err.is_recoverable() => break,
            Phase::Errored(_) => {
                if retry.is_none() {
                    retry = Some(Box::pin(tokio::time::sleep(RETRY_AFTER)));
                }
            }
            _ => retry = None,
        }
        if view.phase == Phase::Terminal && final_status.is_some() {
            break;
        }

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = retry_due(&mut retry) => {
                retry = None;
                handle.retry();
            }
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    println!("{}", render::notice(&notice));
                    final_status = Some(notice.status);
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", style("Stopped watching; the run keeps going.").dim());
                handle.shutdown().await;
                return Ok(ExitCode::from(130));
            }
        }
    }

    let view = handle.view();
    handle.shutdown().await;
    Ok(match (final_status.or(view.status), &view.phase) {
        (_, Phase::Errored(_)) => ExitCode::FAILURE,
        (Some(RunStatus::Failed), _) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Prints what changed between successive views.
#[derive(Default)]
struct Printer {
    header: bool,
    /// The tails as of the last print.
    stdout: Vec<String>,
    stderr: Vec<String>,
    connection: Option<(ConnectionStatus, u32)>,
    progress: Option<String>,
    error: Option<String>,
}

impl Printer {
    fn print(&mut self, view: &RunView) {
        if !self.header {
            if let Some(run) = &view.run {
                println!(
                    "{} {} on {}",
                    style(&run.run_id).bold(),
                    run.benchmark,
                    style(&run.model).dim()
                );
                self.header = true;
            }
        }

        if view.phase.is_active() {
            let connection = (view.connection, view.reconnect_attempts);
            if self.connection != Some(connection) {
                println!("{}", render::connection(connection.0, connection.1));
                self.connection = Some(connection);
            }
        }

        if self.stdout != view.stdout {
            for line in unseen(&self.stdout, &view.stdout) {
                println!("{line}");
            }
            self.stdout = view.stdout.clone();
        }
        if self.stderr != view.stderr {
            for line in unseen(&self.stderr, &view.stderr) {
                eprintln!("{}", style(line).red());
            }
            self.stderr = view.stderr.clone();
        }

        if let Some(progress) = &view.progress {
            let line = render::progress(progress);
            if self.progress.as_ref() != Some(&line) {
                println!("{line}");
                self.progress = Some(line);
            }
        }

        let error = match &view.phase {
            Phase::Errored(err) => Some(err),
            _ => view.last_error.as_ref(),
        }
        .map(render::api_error);
        if let Some(line) = &error {
            if self.error.as_ref() != Some(line) {
                eprintln!("{line}");
            }
        }
        self.error = error;
    }
}

/// Resolves when the pending retry wait elapses; never without one.
async fn retry_due(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.await,
        None => future::pending().await,
    }
}

/// Lines of `tail` that follow what was already printed.
///
/// A polled tail is a fixed-size window that slides as the run writes, so
/// the longest suffix of `seen` that is also a prefix of `tail` is skipped.
/// With no overlap the whole tail is new.
fn unseen<'a>(seen: &[String], tail: &'a [String]) -> &'a [String] {
    let longest = seen.len().min(tail.len());
    let overlap = (1..=longest)
        .rev()
        .find(|&k| seen[seen.len() - k..] == tail[..k])
        .unwrap_or(0);
    &tail[overlap..]
}
