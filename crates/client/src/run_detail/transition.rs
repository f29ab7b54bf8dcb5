//! Pure state transition function for one run's detail view.
//!
//! `transition(view, input) -> (view, effects)`. No IO, no async, no timers:
//! the driver feeds inputs in and executes the effects that come out.

use benchdash_protocol::{LogStream, Progress, RunDetail, RunStatus};

use crate::error::ApiError;
use crate::router::RunEvent;
use crate::transport::ConnectionStatus;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Initial fetch in flight.
    Hydrating,
    /// Active run, live channel connected.
    ActiveLive,
    /// Active run, live channel not connected: the poll drives updates.
    ActivePolling,
    /// Completed, failed or canceled.
    Terminal,
    Errored(ApiError),
}

impl Phase {
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::ActiveLive | Phase::ActivePolling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Hydrating => "hydrating",
            Phase::ActiveLive => "live",
            Phase::ActivePolling => "polling",
            Phase::Terminal => "terminal",
            Phase::Errored(_) => "errored",
        }
    }
}

// ---------------------------------------------------------------------------
// RunView
// ---------------------------------------------------------------------------

/// Everything the detail screen renders for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunView {
    pub run_id: String,
    pub revision: u64,
    pub phase: Phase,
    /// Latest run record, with live deltas merged in.
    pub run: Option<RunDetail>,
    pub status: Option<RunStatus>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub progress: Option<Progress>,
    pub connection: ConnectionStatus,
    pub reconnect_attempts: u32,
    /// Last recoverable poll failure; cleared by the next good poll.
    pub last_error: Option<ApiError>,

    /// A terminal event has been routed; nothing live applies any more.
    sealed: bool,
    notified: bool,
    polling: bool,
    channel_open: bool,
}

impl Default for RunView {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl RunView {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            revision: 0,
            phase: Phase::Hydrating,
            run: None,
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            progress: None,
            connection: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
            sealed: false,
            notified: false,
            polling: false,
            channel_open: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(RunStatus::is_terminal)
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn wants_channel(&self) -> bool {
        self.channel_open
    }

    fn active_phase(&self) -> Phase {
        match self.status {
            None => Phase::Hydrating,
            Some(status) if status.is_terminal() => Phase::Terminal,
            Some(_) if self.connection == ConnectionStatus::Connected => Phase::ActiveLive,
            Some(_) => Phase::ActivePolling,
        }
    }

    /// Latest-wins, except a terminal status is never replaced by an active one.
    fn merged_status(&self, incoming: RunStatus) -> RunStatus {
        match self.status {
            Some(current) if current.is_terminal() && !incoming.is_terminal() => current,
            _ => incoming,
        }
    }

    fn set_status(&mut self, incoming: RunStatus) {
        let status = self.merged_status(incoming);
        self.status = Some(status);
        if let Some(run) = self.run.as_mut() {
            run.status = status;
        }
    }

    fn replace_lines(&mut self, run: &RunDetail) {
        self.stdout = run.stdout_tail.clone();
        self.stderr = run.stderr_tail.clone();
    }
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    Hydrated(RunDetail),
    HydrateFailed(ApiError),
    Polled(RunDetail),
    PollFailed(ApiError),
    Connection {
        status: ConnectionStatus,
        attempts: u32,
    },
    Live(RunEvent),
    Retry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the hydration fetch.
    Fetch,
    StartPolling,
    StopPolling,
    OpenChannel,
    CloseChannel,
    Notify(Notice),
}

/// One-shot toast for a run reaching a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub run_id: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self.status {
            RunStatus::Completed => "Run completed",
            RunStatus::Failed => "Run failed",
            RunStatus::Canceled => "Run canceled",
            RunStatus::Queued | RunStatus::Running => "Run updated",
        }
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Fresh view for `run_id` and the effect that starts loading it.
pub fn start(run_id: impl Into<String>) -> (RunView, Vec<Effect>) {
    (RunView::new(run_id), vec![Effect::Fetch])
}

pub fn transition(mut view: RunView, input: Input) -> (RunView, Vec<Effect>) {
    let mut effects = Vec::new();
    view.revision += 1;

    match input {
        Input::Hydrated(run) => {
            if view.phase != Phase::Hydrating {
                return (view, effects);
            }
            // Re-hydration replaces the lines wholesale.
            view.replace_lines(&run);
            let status = view.merged_status(run.status);
            view.status = Some(status);
            view.run = Some(RunDetail { status, ..run });
            view.last_error = None;
            view.phase = view.active_phase();
        }

        Input::HydrateFailed(err) => {
            if view.phase != Phase::Hydrating {
                return (view, effects);
            }
            view.phase = Phase::Errored(err);
        }

        Input::Polled(run) => {
            if !view.phase.is_active() {
                return (view, effects);
            }
            view.last_error = None;
            if view.connection != ConnectionStatus::Connected {
                view.replace_lines(&run);
            }
            let status = view.merged_status(run.status);
            view.status = Some(status);
            view.run = Some(RunDetail { status, ..run });
            view.phase = view.active_phase();
        }

        Input::PollFailed(err) => {
            if !view.phase.is_active() {
                return (view, effects);
            }
            if err.is_recoverable() {
                view.last_error = Some(err);
            } else {
                view.phase = Phase::Errored(err);
            }
        }

        Input::Connection { status, attempts } => {
            view.connection = status;
            view.reconnect_attempts = attempts;
            if view.phase.is_active() {
                view.phase = view.active_phase();
            }
        }

        Input::Live(event) => {
            let accepting = view.phase.is_active() || view.phase == Phase::Terminal;
            if view.sealed || !accepting {
                return (view, effects);
            }
            apply_event(&mut view, event);
            if view.phase.is_active() {
                view.phase = view.active_phase();
            }
        }

        Input::Retry => match &view.phase {
            Phase::Errored(err) if err.is_recoverable() => {
                view.phase = Phase::Hydrating;
                view.last_error = None;
                effects.push(Effect::Fetch);
            }
            _ => {}
        },
    }

    reconcile(&mut view, &mut effects);
    (view, effects)
}

fn apply_event(view: &mut RunView, event: RunEvent) {
    match event {
        RunEvent::Status(payload) => view.set_status(payload.status),
        RunEvent::LogLine(payload) => match payload.stream {
            LogStream::Stdout => view.stdout.push(payload.line),
            LogStream::Stderr => view.stderr.push(payload.line),
        },
        RunEvent::Progress(progress) => view.progress = Some(progress),
        RunEvent::Completed(payload) => {
            seal(view, RunStatus::Completed);
            if let Some(run) = view.run.as_mut() {
                run.exit_code = payload.exit_code.or(run.exit_code);
                run.finished_at = payload.finished_at.or(run.finished_at.take());
            }
        }
        RunEvent::Failed(payload) => {
            seal(view, RunStatus::Failed);
            if let Some(run) = view.run.as_mut() {
                run.exit_code = payload.exit_code.or(run.exit_code);
                run.error = payload.error.or(run.error.take());
                run.finished_at = payload.finished_at.or(run.finished_at.take());
            }
        }
        RunEvent::Canceled(payload) => {
            seal(view, RunStatus::Canceled);
            if let Some(run) = view.run.as_mut() {
                run.finished_at = payload.finished_at.or(run.finished_at.take());
            }
        }
    }
}

/// The terminal event's status wins over any status seen before it.
fn seal(view: &mut RunView, status: RunStatus) {
    view.status = Some(status);
    if let Some(run) = view.run.as_mut() {
        run.status = status;
    }
    view.sealed = true;
    if view.phase.is_active() {
        view.phase = Phase::Terminal;
    }
}

/// Emit the edge effects that bring timers and the channel in line with the
/// phase. Polling runs iff the run is active and the channel is down.
///
/// A terminal `status` event arrives before the final log lines and the
/// terminal event itself, so a connected channel is kept open until the run
/// is sealed or the server closes it.
fn reconcile(view: &mut RunView, effects: &mut Vec<Effect>) {
    let want_polling = view.phase == Phase::ActivePolling;
    let draining = view.phase == Phase::Terminal
        && !view.sealed
        && view.connection == ConnectionStatus::Connected;
    let want_channel = view.phase.is_active() || (draining && view.channel_open);

    if want_polling != view.polling {
        view.polling = want_polling;
        effects.push(if want_polling {
            Effect::StartPolling
        } else {
            Effect::StopPolling
        });
    }

    if want_channel != view.channel_open {
        view.channel_open = want_channel;
        effects.push(if want_channel {
            Effect::OpenChannel
        } else {
            Effect::CloseChannel
        });
    }

    if view.phase == Phase::Terminal && !view.notified {
        view.notified = true;
        if let Some(status) = view.status {
            let (exit_code, error) = view
                .run
                .as_ref()
                .map(|r| (r.exit_code, r.error.clone()))
                .unwrap_or((None, None));
            effects.push(Effect::Notify(Notice {
                run_id: view.run_id.clone(),
                status,
                exit_code,
                error,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::run_detail;
    use benchdash_protocol::{
        CanceledPayload, CompletedPayload, FailedPayload, LogLinePayload, StatusPayload,
    };

    fn hydrated(status: RunStatus, tail: &str) -> (RunView, Vec<Effect>) {
        let (view, _) = start("r1");
        transition(view, Input::Hydrated(run_detail("r1", status, tail)))
    }

    fn connected(view: RunView) -> (RunView, Vec<Effect>) {
        transition(
            view,
            Input::Connection {
                status: ConnectionStatus::Connected,
                attempts: 0,
            },
        )
    }

    fn disconnected(view: RunView, attempts: u32) -> (RunView, Vec<Effect>) {
        transition(
            view,
            Input::Connection {
                status: ConnectionStatus::Disconnected,
                attempts,
            },
        )
    }

    fn line(text: &str) -> Input {
        Input::Live(RunEvent::LogLine(LogLinePayload {
            stream: LogStream::Stdout,
            line: text.to_string(),
        }))
    }

    fn status(status: RunStatus) -> Input {
        Input::Live(RunEvent::Status(StatusPayload {
            status,
            timestamp: None,
        }))
    }

    fn completed(exit_code: i32) -> Input {
        Input::Live(RunEvent::Completed(CompletedPayload {
            exit_code: Some(exit_code),
            finished_at: Some("2024-01-01T00:00:00Z".into()),
        }))
    }

    fn progress(current: i64) -> Input {
        Input::Live(RunEvent::Progress(Progress {
            current,
            total: 10,
            percentage: current as f64 * 10.0,
            message: None,
        }))
    }

    fn notices(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Notify(_)))
            .count()
    }

    #[test]
    fn start_fetches() {
        let (view, effects) = start("r1");
        assert_eq!(view.phase, Phase::Hydrating);
        assert_eq!(effects, vec![Effect::Fetch]);
    }

    #[test]
    fn hydrating_active_run_polls_and_opens_channel() {
        let (view, effects) = hydrated(RunStatus::Queued, "a\nb");
        assert_eq!(view.phase, Phase::ActivePolling);
        assert_eq!(view.stdout, vec!["a", "b"]);
        assert_eq!(effects, vec![Effect::StartPolling, Effect::OpenChannel]);
    }

    #[test]
    fn hydrating_terminal_run_does_nothing_live_but_notifies_once() {
        let (view, effects) = hydrated(RunStatus::Completed, "done");
        assert_eq!(view.phase, Phase::Terminal);
        assert_eq!(notices(&effects), 1);
        assert!(!effects.contains(&Effect::OpenChannel));
        assert!(!effects.contains(&Effect::StartPolling));

        let (_, effects) = disconnected(view, 0);
        assert!(effects.is_empty());
    }

    #[test]
    fn hydrate_failure_errors_without_polling() {
        let (view, _) = start("r1");
        let (view, effects) = transition(view, Input::HydrateFailed(ApiError::Timeout));
        assert_eq!(view.phase, Phase::Errored(ApiError::Timeout));
        assert!(effects.is_empty());
    }

    #[test]
    fn retry_rehydrates_only_recoverable_errors() {
        let (view, _) = start("r1");
        let (view, _) = transition(view, Input::HydrateFailed(ApiError::Timeout));
        let (view, effects) = transition(view, Input::Retry);
        assert_eq!(view.phase, Phase::Hydrating);
        assert_eq!(effects, vec![Effect::Fetch]);

        let not_found = ApiError::Status {
            status: 404,
            code: None,
            message: "gone".into(),
        };
        let (view, _) = transition(view, Input::HydrateFailed(not_found.clone()));
        let (view, effects) = transition(view, Input::Retry);
        assert_eq!(view.phase, Phase::Errored(not_found));
        assert!(effects.is_empty());
    }

    #[test]
    fn connecting_stops_polling_and_dropping_resumes_it() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, effects) = connected(view);
        assert_eq!(view.phase, Phase::ActiveLive);
        assert_eq!(effects, vec![Effect::StopPolling]);

        let (view, effects) = disconnected(view, 1);
        assert_eq!(view.phase, Phase::ActivePolling);
        assert_eq!(view.reconnect_attempts, 1);
        assert_eq!(effects, vec![Effect::StartPolling]);
        assert!(view.wants_channel(), "channel stays owned while reconnecting");
    }

    #[test]
    fn live_lines_append_after_snapshot() {
        let (view, _) = hydrated(RunStatus::Running, "a\nb");
        let (view, _) = connected(view);
        let (view, _) = transition(view, line("c"));
        let (view, _) = transition(view, line("d"));
        let (view, _) = transition(view, line("e"));
        assert_eq!(view.stdout, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn stderr_lines_go_to_stderr() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = transition(
            view,
            Input::Live(RunEvent::LogLine(LogLinePayload {
                stream: LogStream::Stderr,
                line: "warn".into(),
            })),
        );
        assert!(view.stdout.is_empty());
        assert_eq!(view.stderr, vec!["warn"]);
    }

    #[test]
    fn poll_replaces_lines_only_while_disconnected() {
        let (view, _) = hydrated(RunStatus::Running, "a");
        let (view, _) = transition(view, Input::Polled(run_detail("r1", RunStatus::Running, "a\nb\nc")));
        assert_eq!(view.stdout.len(), 3);

        let (view, _) = connected(view);
        let (view, _) = transition(view, line("d"));
        let (view, _) = transition(view, Input::Polled(run_detail("r1", RunStatus::Running, "x")));
        assert_eq!(view.stdout, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn terminal_event_seals_the_run() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = connected(view);
        let (view, _) = transition(view, progress(5));
        let (view, effects) = transition(view, completed(0));

        assert_eq!(view.phase, Phase::Terminal);
        assert_eq!(view.status, Some(RunStatus::Completed));
        assert!(effects.contains(&Effect::CloseChannel));
        assert_eq!(notices(&effects), 1);
        let run = view.run.as_ref().unwrap();
        assert_eq!(run.exit_code, Some(0));
        assert_eq!(run.finished_at.as_deref(), Some("2024-01-01T00:00:00Z"));

        // Out-of-order deliveries after the terminal event change nothing.
        let before = view.clone();
        let (view, e1) = transition(view, line("late"));
        let (view, e2) = transition(view, progress(9));
        let (view, e3) = transition(view, status(RunStatus::Running));
        let (view, e4) = transition(view, completed(1));
        assert!(e1.is_empty() && e2.is_empty() && e3.is_empty() && e4.is_empty());
        assert_eq!(view.stdout, before.stdout);
        assert_eq!(view.progress, before.progress);
        assert_eq!(view.status, Some(RunStatus::Completed));
        assert_eq!(view.run.as_ref().unwrap().exit_code, Some(0));
    }

    #[test]
    fn terminal_status_then_trailing_lines_then_completed() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = connected(view);
        let (view, effects) = transition(view, status(RunStatus::Completed));
        assert_eq!(view.phase, Phase::Terminal);
        assert_eq!(notices(&effects), 1);
        assert!(!effects.contains(&Effect::CloseChannel));

        // The server flushes the last lines before the completed event.
        let (view, _) = transition(view, line("final"));
        let (view, effects) = transition(view, completed(0));
        assert_eq!(view.stdout, vec!["final"]);
        assert_eq!(effects, vec![Effect::CloseChannel], "notified exactly once");
        assert_eq!(view.run.as_ref().unwrap().exit_code, Some(0));
    }

    #[test]
    fn active_status_never_overrides_terminal() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = transition(view, status(RunStatus::Failed));
        let (view, _) = transition(view, status(RunStatus::Running));
        assert_eq!(view.status, Some(RunStatus::Failed));

        let (view, _) = transition(view, Input::Polled(run_detail("r1", RunStatus::Running, "")));
        assert_eq!(view.status, Some(RunStatus::Failed));
    }

    #[test]
    fn failed_and_canceled_merge_final_fields() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = transition(
            view,
            Input::Live(RunEvent::Failed(FailedPayload {
                exit_code: Some(2),
                error: Some("OOM".into()),
                finished_at: None,
            })),
        );
        assert_eq!(view.status, Some(RunStatus::Failed));
        let run = view.run.as_ref().unwrap();
        assert_eq!(run.error.as_deref(), Some("OOM"));
        assert_eq!(run.exit_code, Some(2));

        let (view, _) = hydrated(RunStatus::Queued, "");
        let (view, effects) = transition(
            view,
            Input::Live(RunEvent::Canceled(CanceledPayload {
                finished_at: Some("t".into()),
            })),
        );
        assert_eq!(view.status, Some(RunStatus::Canceled));
        assert!(effects.contains(&Effect::StopPolling));
        assert!(effects.contains(&Effect::CloseChannel));
    }

    #[test]
    fn poll_can_reach_terminal() {
        let (view, _) = hydrated(RunStatus::Running, "a");
        let mut done = run_detail("r1", RunStatus::Completed, "a\nb");
        done.exit_code = Some(0);
        let (view, effects) = transition(view, Input::Polled(done));

        assert_eq!(view.phase, Phase::Terminal);
        assert_eq!(view.stdout, vec!["a", "b"]);
        assert_eq!(
            effects,
            vec![
                Effect::StopPolling,
                Effect::CloseChannel,
                Effect::Notify(Notice {
                    run_id: "r1".into(),
                    status: RunStatus::Completed,
                    exit_code: Some(0),
                    error: None,
                }),
            ]
        );

        // A late poll response after terminal is ignored.
        let (view, effects) =
            transition(view, Input::Polled(run_detail("r1", RunStatus::Running, "")));
        assert!(effects.is_empty());
        assert_eq!(view.stdout, vec!["a", "b"]);
    }

    #[test]
    fn recoverable_poll_failure_keeps_polling() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, effects) = transition(view, Input::PollFailed(ApiError::Network("down".into())));
        assert_eq!(view.phase, Phase::ActivePolling);
        assert!(view.last_error.is_some());
        assert!(effects.is_empty());

        let (view, _) = transition(view, Input::Polled(run_detail("r1", RunStatus::Running, "")));
        assert!(view.last_error.is_none());
    }

    #[test]
    fn unrecoverable_poll_failure_errors_and_tears_down() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let gone = ApiError::Status {
            status: 404,
            code: Some("RUN_NOT_FOUND".into()),
            message: "gone".into(),
        };
        let (view, effects) = transition(view, Input::PollFailed(gone.clone()));
        assert_eq!(view.phase, Phase::Errored(gone));
        assert_eq!(effects, vec![Effect::StopPolling, Effect::CloseChannel]);
    }

    #[test]
    fn stale_hydration_results_are_ignored() {
        let (view, _) = hydrated(RunStatus::Running, "a");
        let (view, effects) =
            transition(view, Input::Hydrated(run_detail("r1", RunStatus::Running, "x\ny\nz")));
        assert!(effects.is_empty());
        assert_eq!(view.stdout, vec!["a"]);

        let (view, _) = transition(view, Input::HydrateFailed(ApiError::Timeout));
        assert_eq!(view.phase, Phase::ActivePolling);
    }

    #[test]
    fn server_close_after_terminal_status_releases_channel() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = connected(view);
        let (view, _) = transition(view, status(RunStatus::Canceled));
        assert!(view.wants_channel());

        let (view, effects) = disconnected(view, 0);
        assert_eq!(view.phase, Phase::Terminal);
        assert_eq!(effects, vec![Effect::CloseChannel]);
        assert!(!view.is_polling());
    }

    #[test]
    fn progress_is_latest_wins() {
        let (view, _) = hydrated(RunStatus::Running, "");
        let (view, _) = transition(view, progress(3));
        let (view, _) = transition(view, progress(2));
        assert_eq!(view.progress.as_ref().map(|p| p.current), Some(2));
    }
}
