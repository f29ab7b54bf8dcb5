//! Run detail view-model.
//!
//! One tokio task per viewed run. It feeds REST results and live-channel
//! events through [`transition`] and executes the effects that come back:
//! it owns the [`LiveChannel`], the poll interval and the in-flight request.
//! Readers see an `ArcSwap` snapshot; a `watch` counter ticks on every publish
//! and terminal toasts go out on a broadcast channel.

pub mod transition;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use benchdash_protocol::RunDetail;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::backoff::{JitterSource, RandomJitter};
use crate::error::ApiError;
use crate::rest::RunsApi;
use crate::router::route_run_event;
use crate::socket::Connector;
use crate::transport::{
    delayed_interval, next_event, next_ready, next_tick, ChannelEvent, LiveChannel, LiveSettings,
};

pub use transition::{Effect, Input, Notice, Phase, RunView};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_500);
const NOTICE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct RunDetailConfig {
    pub live: LiveSettings,
    pub poll_interval: Duration,
}

impl RunDetailConfig {
    pub fn new(live: LiveSettings) -> Self {
        Self {
            live,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub fn run_channel_path(run_id: &str) -> String {
    format!("/api/ws/runs/{run_id}")
}

enum Command {
    Retry,
    SwitchRun(String),
    Dispose,
}

/// Handle to a running detail view. Dropping it tears the view down.
pub struct RunDetailHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    api: Arc<dyn RunsApi>,
    view: Arc<ArcSwap<RunView>>,
    changes: watch::Receiver<u64>,
    notices: broadcast::Sender<Notice>,
    disposed: AtomicBool,
    task: Option<JoinHandle<()>>,
}

impl RunDetailHandle {
    pub fn spawn(
        run_id: impl Into<String>,
        api: Arc<dyn RunsApi>,
        connector: Arc<dyn Connector>,
        config: RunDetailConfig,
    ) -> Self {
        Self::spawn_with_jitter(run_id, api, connector, config, Arc::new(RandomJitter))
    }

    pub fn spawn_with_jitter(
        run_id: impl Into<String>,
        api: Arc<dyn RunsApi>,
        connector: Arc<dyn Connector>,
        config: RunDetailConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        let (view, effects) = transition::start(run_id);
        let published = Arc::new(ArcSwap::from_pointee(view.clone()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (changes_tx, changes) = watch::channel(0);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let task = RunDetailTask {
            api: Arc::clone(&api),
            connector,
            jitter,
            config,
            view,
            published: Arc::clone(&published),
            changes: changes_tx,
            notices: notices.clone(),
            channel: None,
            channel_events: None,
            poll: None,
            request: None,
            request_kind: None,
        };
        let handle = tokio::spawn(task.run(command_rx, effects));

        Self {
            command_tx,
            api,
            view: published,
            changes,
            notices,
            disposed: AtomicBool::new(false),
            task: Some(handle),
        }
    }

    pub fn view(&self) -> Arc<RunView> {
        self.view.load_full()
    }

    /// Ticks whenever a new view is published.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Re-enter hydration after a recoverable failure.
    pub fn retry(&self) {
        self.command(Command::Retry);
    }

    /// Tear down everything for the current run, then load `run_id`.
    pub fn switch_run(&self, run_id: impl Into<String>) {
        self.command(Command::SwitchRun(run_id.into()));
    }

    /// Ask the server to cancel the run being viewed. The resulting status
    /// change arrives through the channel or the poll like any other.
    pub async fn cancel_run(&self) -> Result<(), ApiError> {
        let run_id = self.view().run_id.clone();
        self.api.cancel_run(&run_id).await
    }

    /// Resolve once `predicate` holds for the published view, or the task is
    /// gone.
    pub async fn wait_until<F>(&self, predicate: F) -> Arc<RunView>
    where
        F: Fn(&RunView) -> bool,
    {
        let mut changes = self.changes.clone();
        loop {
            let _ = changes.borrow_and_update();
            let view = self.view();
            if predicate(&view) {
                return view;
            }
            if changes.changed().await.is_err() {
                return self.view();
            }
        }
    }

    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(Command::Dispose);
    }

    /// Dispose and wait until the channel, timers and request are released.
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn command(&self, cmd: Command) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(cmd);
    }
}

impl Drop for RunDetailHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Hydrate,
    Poll,
}

type PendingRequest = BoxFuture<'static, (RequestKind, Result<RunDetail, ApiError>)>;

struct RunDetailTask {
    api: Arc<dyn RunsApi>,
    connector: Arc<dyn Connector>,
    jitter: Arc<dyn JitterSource>,
    config: RunDetailConfig,

    view: RunView,
    published: Arc<ArcSwap<RunView>>,
    changes: watch::Sender<u64>,
    notices: broadcast::Sender<Notice>,

    channel: Option<LiveChannel>,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,
    poll: Option<Interval>,
    /// Dropping this aborts the request.
    request: Option<PendingRequest>,
    request_kind: Option<RequestKind>,
}

impl RunDetailTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>, initial: Vec<Effect>) {
        self.execute(initial).await;

        loop {
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    match command {
                        Some(Command::Retry) => self.apply(Input::Retry).await,
                        Some(Command::SwitchRun(run_id)) => self.switch_run(run_id).await,
                        Some(Command::Dispose) | None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
                event = next_event(&mut self.channel_events) => {
                    match event {
                        Some(event) => self.on_channel_event(event).await,
                        None => self.channel_events = None,
                    }
                }
                (kind, result) = next_ready(&mut self.request) => {
                    self.request = None;
                    self.request_kind = None;
                    let input = match (kind, result) {
                        (RequestKind::Hydrate, Ok(run)) => Input::Hydrated(run),
                        (RequestKind::Hydrate, Err(e)) => Input::HydrateFailed(e),
                        (RequestKind::Poll, Ok(run)) => Input::Polled(run),
                        (RequestKind::Poll, Err(e)) => Input::PollFailed(e),
                    };
                    self.apply(input).await;
                }
                () = next_tick(&mut self.poll) => {
                    self.start_request(RequestKind::Poll);
                }
            }
        }

        debug!(
            component = "run_detail",
            event = "run_detail.task.exited",
            run_id = %self.view.run_id,
            "Run detail task exited"
        );
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status { status, attempts } => {
                self.apply(Input::Connection { status, attempts }).await;
            }
            ChannelEvent::Message(envelope) => {
                if let Some(event) = route_run_event(&envelope) {
                    self.apply(Input::Live(event)).await;
                }
            }
            ChannelEvent::Closed(info) => debug!(
                component = "run_detail",
                event = "run_detail.channel.closed",
                run_id = %self.view.run_id,
                code = info.code,
                clean = info.clean,
                "Run channel closed"
            ),
            ChannelEvent::Error(message) => debug!(
                component = "run_detail",
                event = "run_detail.channel.error",
                run_id = %self.view.run_id,
                error = %message,
                "Run channel error"
            ),
        }
    }

    async fn apply(&mut self, input: Input) {
        let view = std::mem::take(&mut self.view);
        let (view, effects) = transition::transition(view, input);
        self.view = view;
        self.publish();
        self.execute(effects).await;
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Fetch => self.start_request(RequestKind::Hydrate),
                Effect::StartPolling => {
                    debug!(
                        component = "run_detail",
                        event = "run_detail.polling.started",
                        run_id = %self.view.run_id,
                        interval_ms = self.config.poll_interval.as_millis() as u64,
                        "Polling fallback started"
                    );
                    self.poll = Some(delayed_interval(self.config.poll_interval));
                }
                Effect::StopPolling => {
                    debug!(
                        component = "run_detail",
                        event = "run_detail.polling.stopped",
                        run_id = %self.view.run_id,
                        "Polling fallback stopped"
                    );
                    self.poll = None;
                    if self.request_kind == Some(RequestKind::Poll) {
                        self.request = None;
                        self.request_kind = None;
                    }
                }
                Effect::OpenChannel => self.open_channel(),
                Effect::CloseChannel => self.close_channel().await,
                Effect::Notify(notice) => {
                    info!(
                        component = "run_detail",
                        event = "run_detail.terminal",
                        run_id = %notice.run_id,
                        status = %notice.status,
                        exit_code = ?notice.exit_code,
                        "Run reached a terminal state"
                    );
                    let _ = self.notices.send(notice);
                }
            }
        }
    }

    fn start_request(&mut self, kind: RequestKind) {
        if kind == RequestKind::Poll && self.request.is_some() {
            debug!(
                component = "run_detail",
                event = "run_detail.poll.skipped",
                run_id = %self.view.run_id,
                "Previous request still in flight"
            );
            return;
        }
        let api = Arc::clone(&self.api);
        let run_id = self.view.run_id.clone();
        self.request_kind = Some(kind);
        self.request = Some(Box::pin(async move {
            let result = api.get_run(&run_id).await;
            (kind, result)
        }));
    }

    fn open_channel(&mut self) {
        let path = run_channel_path(&self.view.run_id);
        let config = match self.config.live.channel_config(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    component = "run_detail",
                    event = "run_detail.channel.invalid_url",
                    run_id = %self.view.run_id,
                    error = %e,
                    "Cannot open run channel, staying on polling"
                );
                return;
            }
        };
        let (channel, events) = LiveChannel::spawn_with_jitter(
            config,
            Arc::clone(&self.connector),
            Arc::clone(&self.jitter),
        );
        self.channel = Some(channel);
        self.channel_events = Some(events);
    }

    async fn close_channel(&mut self) {
        self.channel_events = None;
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
    }

    async fn teardown(&mut self) {
        self.poll = None;
        self.request = None;
        self.request_kind = None;
        self.close_channel().await;
    }

    async fn switch_run(&mut self, run_id: String) {
        info!(
            component = "run_detail",
            event = "run_detail.switch",
            from = %self.view.run_id,
            to = %run_id,
            "Switching run"
        );
        // Nothing from the previous run may outlive this point.
        self.teardown().await;
        let (view, effects) = transition::start(run_id);
        self.view = view;
        self.publish();
        self.execute(effects).await;
    }

    fn publish(&self) {
        self.published.store(Arc::new(self.view.clone()));
        self.changes.send_modify(|n| *n += 1);
    }
}
