//! Dashboard list view-model.
//!
//! Periodic refetch is the baseline and is always on. When live settings are
//! given, `run_created`/`run_deleted`/`run_status` deltas from the dashboard
//! channel are merged in between refetches.

pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use benchdash_protocol::{BulkDeleteDetails, ListRunsQuery, RunSummary};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::backoff::{JitterSource, RandomJitter};
use crate::error::ApiError;
use crate::rest::RunsApi;
use crate::router::route_dashboard_event;
use crate::socket::Connector;
use crate::transport::{
    delayed_interval, next_event, next_ready, next_tick, ChannelEvent, LiveChannel, LiveSettings,
};

pub use state::{DashboardInput, DashboardState};

pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(5);
pub const DASHBOARD_CHANNEL_PATH: &str = "/api/ws/dashboard";

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Open the dashboard channel with these settings; `None` is refetch only.
    pub live: Option<LiveSettings>,
    pub refetch_interval: Duration,
    pub query: ListRunsQuery,
}

impl DashboardConfig {
    pub fn new(live: Option<LiveSettings>) -> Self {
        Self {
            live,
            refetch_interval: DEFAULT_REFETCH_INTERVAL,
            query: ListRunsQuery::default(),
        }
    }
}

/// Outcome of [`DashboardHandle::delete_selected`], grouped the way the
/// server reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    /// Skipped by the server until canceled.
    pub running: Vec<String>,
    pub not_found: Vec<String>,
}

impl DeleteReport {
    /// Every requested run was deleted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.running.is_empty() && self.not_found.is_empty()
    }

    /// Runs the server no longer has.
    pub fn gone(&self) -> Vec<String> {
        self.deleted
            .iter()
            .chain(&self.not_found)
            .cloned()
            .collect()
    }
}

impl From<BulkDeleteDetails> for DeleteReport {
    fn from(details: BulkDeleteDetails) -> Self {
        Self {
            deleted: details.deleted,
            failed: details.failed,
            running: details.running,
            not_found: details.not_found,
        }
    }
}

enum Command {
    SetQuery(ListRunsQuery),
    Refetch,
    Toggle(String),
    Select(Vec<String>, oneshot::Sender<Arc<DashboardState>>),
    SelectAll,
    ClearSelection,
    Removed(Vec<String>),
    Dispose,
}

pub struct DashboardHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    api: Arc<dyn RunsApi>,
    state: Arc<ArcSwap<DashboardState>>,
    changes: watch::Receiver<u64>,
    disposed: AtomicBool,
    task: Option<JoinHandle<()>>,
}

impl DashboardHandle {
    pub fn spawn(
        api: Arc<dyn RunsApi>,
        connector: Arc<dyn Connector>,
        config: DashboardConfig,
    ) -> Self {
        Self::spawn_with_jitter(api, connector, config, Arc::new(RandomJitter))
    }

    pub fn spawn_with_jitter(
        api: Arc<dyn RunsApi>,
        connector: Arc<dyn Connector>,
        config: DashboardConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        let state = DashboardState::new(config.query.clone());
        let published = Arc::new(ArcSwap::from_pointee(state.clone()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (changes_tx, changes) = watch::channel(0);

        let task = DashboardTask {
            api: Arc::clone(&api),
            connector,
            jitter,
            refetch_interval: config.refetch_interval,
            live: config.live,
            state,
            published: Arc::clone(&published),
            changes: changes_tx,
            channel: None,
            channel_events: None,
            refetch: None,
            request: None,
        };
        let handle = tokio::spawn(task.run(command_rx));

        Self {
            command_tx,
            api,
            state: published,
            changes,
            disposed: AtomicBool::new(false),
            task: Some(handle),
        }
    }

    pub fn state(&self) -> Arc<DashboardState> {
        self.state.load_full()
    }

    /// Ticks whenever a new state is published.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    /// Change the filters and refetch right away.
    pub fn set_query(&self, query: ListRunsQuery) {
        self.command(Command::SetQuery(query));
    }

    pub fn refetch(&self) {
        self.command(Command::Refetch);
    }

    pub fn toggle(&self, run_id: impl Into<String>) {
        self.command(Command::Toggle(run_id.into()));
    }

    /// Replace the selection in one step and return the state it landed
    /// in. `None` once the dashboard is disposed.
    pub async fn select(&self, run_ids: Vec<String>) -> Option<Arc<DashboardState>> {
        let (reply, applied) = oneshot::channel();
        self.command(Command::Select(run_ids, reply));
        applied.await.ok()
    }

    pub fn select_all(&self) {
        self.command(Command::SelectAll);
    }

    pub fn clear_selection(&self) {
        self.command(Command::ClearSelection);
    }

    /// Selected runs, in list order.
    pub fn export_selected(&self) -> Vec<RunSummary> {
        self.state().selected()
    }

    /// Delete every selected run with one bulk request. Runs the server no
    /// longer has leave the list immediately; the others stay selected.
    pub async fn delete_selected(&self) -> Result<DeleteReport, ApiError> {
        let run_ids = self.state().selected_ids();
        if run_ids.is_empty() {
            return Ok(DeleteReport::default());
        }
        let report = match self.api.bulk_delete_runs(&run_ids).await {
            Ok(details) => DeleteReport::from(details),
            Err(e) => {
                warn!(
                    component = "dashboard",
                    event = "dashboard.delete.failed",
                    runs = run_ids.len(),
                    error = %e,
                    "Bulk delete failed"
                );
                return Err(e);
            }
        };
        info!(
            component = "dashboard",
            event = "dashboard.delete.completed",
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            running = report.running.len(),
            not_found = report.not_found.len(),
            "Deleted selected runs"
        );
        let gone = report.gone();
        if !gone.is_empty() {
            self.command(Command::Removed(gone));
        }
        Ok(report)
    }

    /// Resolve once `predicate` holds for the published state, or the task
    /// is gone.
    pub async fn wait_until<F>(&self, predicate: F) -> Arc<DashboardState>
    where
        F: Fn(&DashboardState) -> bool,
    {
        let mut changes = self.changes.clone();
        loop {
            let _ = changes.borrow_and_update();
            let state = self.state();
            if predicate(&state) {
                return state;
            }
            if changes.changed().await.is_err() {
                return self.state();
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

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

type PendingRefetch = BoxFuture<'static, Result<Vec<RunSummary>, ApiError>>;

struct DashboardTask {
    api: Arc<dyn RunsApi>,
    connector: Arc<dyn Connector>,
    jitter: Arc<dyn JitterSource>,
    refetch_interval: Duration,
    live: Option<LiveSettings>,

    state: DashboardState,
    published: Arc<ArcSwap<DashboardState>>,
    changes: watch::Sender<u64>,

    channel: Option<LiveChannel>,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,
    refetch: Option<Interval>,
    request: Option<PendingRefetch>,
}

impl DashboardTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        self.start_refetch();
        self.refetch = Some(delayed_interval(self.refetch_interval));
        self.open_channel();

        loop {
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    match command {
                        Some(Command::SetQuery(query)) => {
                            self.state.set_query(query);
                            self.publish();
                            // Results for the old filters are no longer wanted.
                            self.request = None;
                            self.start_refetch();
                        }
                        Some(Command::Refetch) => self.start_refetch(),
                        Some(Command::Toggle(run_id)) => {
                            self.state.toggle(&run_id);
                            self.publish();
                        }
                        Some(Command::Select(run_ids, reply)) => {
                            self.state.select(&run_ids);
                            self.publish();
                            let _ = reply.send(self.published.load_full());
                        }
                        Some(Command::SelectAll) => {
                            self.state.select_all();
                            self.publish();
                        }
                        Some(Command::ClearSelection) => {
                            self.state.clear_selection();
                            self.publish();
                        }
                        Some(Command::Removed(run_ids)) => {
                            self.apply(DashboardInput::Removed(run_ids));
                        }
                        Some(Command::Dispose) | None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
                event = next_event(&mut self.channel_events) => {
                    match event {
                        Some(event) => self.on_channel_event(event),
                        None => self.channel_events = None,
                    }
                }
                result = next_ready(&mut self.request) => {
                    self.request = None;
                    match result {
                        Ok(runs) => self.apply(DashboardInput::Refetched(runs)),
                        Err(e) => {
                            warn!(
                                component = "dashboard",
                                event = "dashboard.refetch.failed",
                                error = %e,
                                "Dashboard refetch failed"
                            );
                            self.apply(DashboardInput::RefetchFailed(e));
                        }
                    }
                }
                () = next_tick(&mut self.refetch) => self.start_refetch(),
            }
        }

        debug!(
            component = "dashboard",
            event = "dashboard.task.exited",
            "Dashboard task exited"
        );
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status { status, attempts } => {
                self.apply(DashboardInput::Connection { status, attempts })
            }
            ChannelEvent::Message(envelope) => {
                if let Some(event) = route_dashboard_event(&envelope) {
                    self.apply(DashboardInput::Live(event));
                }
            }
            ChannelEvent::Closed(_) | ChannelEvent::Error(_) => {}
        }
    }

    fn apply(&mut self, input: DashboardInput) {
        self.state.apply(input);
        self.publish();
    }

    fn start_refetch(&mut self) {
        if self.request.is_some() {
            return;
        }
        let api = Arc::clone(&self.api);
        let query = self.state.query.clone();
        self.request = Some(Box::pin(async move { api.list_runs(&query).await }));
    }

    fn open_channel(&mut self) {
        let Some(live) = &self.live else {
            return;
        };
        let config = match live.channel_config(DASHBOARD_CHANNEL_PATH) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    component = "dashboard",
                    event = "dashboard.channel.invalid_url",
                    error = %e,
                    "Cannot open dashboard channel, refetch only"
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

    async fn teardown(&mut self) {
        self.refetch = None;
        self.request = None;
        self.channel_events = None;
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
    }

    fn publish(&self) {
        self.published.store(Arc::new(self.state.clone()));
        self.changes.send_modify(|n| *n += 1);
    }
}
