//! Terminal formatting shared by the commands.

use benchdash_client::{ApiError, ConnectionStatus, DeleteReport, Notice};
use benchdash_protocol::{Progress, RunStatus, RunSummary};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};

pub fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Queued => Color::Yellow,
        RunStatus::Running => Color::Cyan,
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Canceled => Color::DarkGrey,
    }
}

pub fn styled_status(status: RunStatus) -> StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        RunStatus::Queued => text.yellow(),
        RunStatus::Running => text.cyan(),
        RunStatus::Completed => text.green(),
        RunStatus::Failed => text.red(),
        RunStatus::Canceled => text.dim(),
    }
}

pub fn runs_table<'a>(
    runs: impl IntoIterator<Item = &'a RunSummary>,
    selected: impl Fn(&str) -> bool,
) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["", "RUN", "BENCHMARK", "MODEL", "STATUS", "METRIC", "CREATED"]);

    for run in runs {
        let metric = match (&run.primary_metric_name, run.primary_metric) {
            (Some(name), Some(value)) => format!("{name} {value:.3}"),
            (None, Some(value)) => format!("{value:.3}"),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(if selected(&run.run_id) { "*" } else { "" }),
            Cell::new(&run.run_id),
            Cell::new(&run.benchmark),
            Cell::new(&run.model),
            Cell::new(run.status.as_str()).fg(status_color(run.status)),
            Cell::new(metric),
            Cell::new(run.created_at.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

pub fn connection(status: ConnectionStatus, attempts: u32) -> String {
    match status {
        ConnectionStatus::Connected => style("● live").green().to_string(),
        ConnectionStatus::Connecting if attempts > 0 => style(format!(
            "◌ reconnecting (attempt {attempts}), polling meanwhile"
        ))
        .yellow()
        .to_string(),
        ConnectionStatus::Connecting => style("◌ connecting").yellow().to_string(),
        ConnectionStatus::Disconnected if attempts > 0 => style(format!(
            "○ disconnected (retry {attempts}), polling meanwhile"
        ))
        .yellow()
        .to_string(),
        ConnectionStatus::Disconnected => style("○ disconnected, polling").dim().to_string(),
        ConnectionStatus::Error => style("○ connection error, polling").red().to_string(),
    }
}

pub fn progress(progress: &Progress) -> String {
    let mut line = format!(
        "[{}/{}] {:.1}%",
        progress.current, progress.total, progress.percentage
    );
    if let Some(message) = &progress.message {
        line.push(' ');
        line.push_str(message);
    }
    style(line).bold().to_string()
}

pub fn notice(notice: &Notice) -> String {
    let title = match notice.status {
        RunStatus::Completed => style(notice.title()).green().bold(),
        RunStatus::Failed => style(notice.title()).red().bold(),
        _ => style(notice.title()).bold(),
    };
    let mut line = format!("{title} {}", style(&notice.run_id).dim());
    if let Some(code) = notice.exit_code {
        line.push_str(&format!(" (exit {code})"));
    }
    if let Some(error) = &notice.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

/// One line per run, deleted first.
pub fn delete_report(report: &DeleteReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .deleted
        .iter()
        .map(|id| format!("Deleted {}", style(id).bold()))
        .collect();
    let skipped = [
        (&report.running, "still running, cancel it first"),
        (&report.not_found, "not found"),
        (&report.failed, "delete failed"),
    ];
    for (run_ids, reason) in skipped {
        lines.extend(
            run_ids
                .iter()
                .map(|id| format!("{id}: {}", style(reason).red())),
        );
    }
    lines
}

pub fn api_error(err: &ApiError) -> String {
    let p = err.presentation();
    let mut line = format!("{} {}", style(p.title).red().bold(), p.message);
    if p.retry {
        line.push_str(&style(" (will retry)").dim().to_string());
    }
    line
}
