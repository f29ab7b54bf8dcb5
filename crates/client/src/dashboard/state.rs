//! Dashboard list state.
//!
//! No IO here: the driver feeds refetch results, live deltas and connection
//! changes through [`DashboardState::apply`], and selection is plain methods.

use std::collections::HashSet;

use benchdash_protocol::{ListRunsQuery, RunNotice, RunStatus, RunSummary};

use crate::error::ApiError;
use crate::router::DashboardEvent;
use crate::transport::ConnectionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardInput {
    Refetched(Vec<RunSummary>),
    RefetchFailed(ApiError),
    Live(DashboardEvent),
    Connection {
        status: ConnectionStatus,
        attempts: u32,
    },
    /// Runs deleted through this client.
    Removed(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    /// Bumped on every change.
    pub revision: u64,
    pub runs: Vec<RunSummary>,
    pub query: ListRunsQuery,
    /// True once the first refetch succeeded.
    pub loaded: bool,
    /// Failure of the most recent refetch, cleared by the next success.
    pub last_error: Option<ApiError>,
    /// `None` when the live channel is not in use.
    pub connection: Option<ConnectionStatus>,
    /// Reconnects scheduled since the channel was last connected.
    pub reconnect_attempts: u32,
    selection: HashSet<String>,
}

impl DashboardState {
    pub fn new(query: ListRunsQuery) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, input: DashboardInput) {
        match input {
            DashboardInput::Refetched(runs) => {
                self.runs = runs;
                self.loaded = true;
                self.last_error = None;
                self.reconcile_selection();
            }
            DashboardInput::RefetchFailed(err) => {
                // Keep the last good list on screen.
                self.last_error = Some(err);
            }
            DashboardInput::Live(event) => self.apply_live(event),
            DashboardInput::Connection { status, attempts } => {
                self.connection = Some(status);
                self.reconnect_attempts = attempts;
            }
            DashboardInput::Removed(run_ids) => {
                for run_id in &run_ids {
                    self.remove(run_id);
                }
            }
        }
        self.revision += 1;
    }

    /// New filters; the list is stale until the next refetch lands.
    pub fn set_query(&mut self, query: ListRunsQuery) {
        self.query = query;
        self.revision += 1;
    }

    pub fn get(&self, run_id: &str) -> Option<&RunSummary> {
        self.runs.iter().find(|r| r.run_id == run_id)
    }

    pub fn toggle(&mut self, run_id: &str) {
        if self.get(run_id).is_none() {
            return;
        }
        if !self.selection.remove(run_id) {
            self.selection.insert(run_id.to_string());
        }
        self.revision += 1;
    }

    /// Replace the selection with the listed runs among `run_ids`.
    /// Repeats collapse and unknown ids are ignored.
    pub fn select(&mut self, run_ids: &[String]) {
        self.selection = run_ids
            .iter()
            .filter(|id| self.get(id).is_some())
            .cloned()
            .collect();
        self.revision += 1;
    }

    pub fn select_all(&mut self) {
        self.selection = self.runs.iter().map(|r| r.run_id.clone()).collect();
        self.revision += 1;
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.revision += 1;
    }

    pub fn is_selected(&self, run_id: &str) -> bool {
        self.selection.contains(run_id)
    }

    /// Selected runs in list order.
    pub fn selected(&self) -> Vec<RunSummary> {
        self.runs
            .iter()
            .filter(|r| self.selection.contains(&r.run_id))
            .cloned()
            .collect()
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selected().into_iter().map(|r| r.run_id).collect()
    }

    pub fn count_by_status(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }

    fn apply_live(&mut self, event: DashboardEvent) {
        match event {
            DashboardEvent::RunCreated(notice) => {
                if self.get(&notice.run_id).is_some() {
                    self.patch(&notice);
                    return;
                }
                let summary = summary_from_notice(notice);
                if !self.accepts(&summary) {
                    return;
                }
                self.runs.insert(0, summary);
                if let Some(limit) = self.query.limit {
                    self.runs.truncate(limit as usize);
                    self.reconcile_selection();
                }
            }
            DashboardEvent::RunDeleted(notice) => self.remove(&notice.run_id),
            // Unknown runs arrive with the next refetch.
            DashboardEvent::RunStatus(notice) => self.patch(&notice),
        }
    }

    /// Whether a pushed run belongs in the filtered list. Text search and tag
    /// filters are evaluated by the server, so such runs wait for a refetch.
    fn accepts(&self, run: &RunSummary) -> bool {
        let query = &self.query;
        if query.search.is_some() || query.tag.is_some() {
            return false;
        }
        if query.status.is_some_and(|s| s != run.status) {
            return false;
        }
        if query
            .benchmark
            .as_deref()
            .is_some_and(|b| b != run.benchmark)
        {
            return false;
        }
        true
    }

    fn patch(&mut self, notice: &RunNotice) {
        let Some(run) = self.runs.iter_mut().find(|r| r.run_id == notice.run_id) else {
            return;
        };
        if let Some(status) = notice.status {
            run.status = status;
        }
        if let Some(benchmark) = &notice.benchmark {
            run.benchmark = benchmark.clone();
        }
        if let Some(model) = &notice.model {
            run.model = model.clone();
        }
    }

    fn remove(&mut self, run_id: &str) {
        self.runs.retain(|r| r.run_id != run_id);
        self.selection.remove(run_id);
    }

    fn reconcile_selection(&mut self) {
        let present: HashSet<&str> = self.runs.iter().map(|r| r.run_id.as_str()).collect();
        self.selection.retain(|id| present.contains(id.as_str()));
    }
}

fn summary_from_notice(notice: RunNotice) -> RunSummary {
    RunSummary {
        run_id: notice.run_id,
        benchmark: notice.benchmark.unwrap_or_default(),
        model: notice.model.unwrap_or_default(),
        status: notice.status.unwrap_or(RunStatus::Queued),
        created_at: notice.timestamp,
        finished_at: None,
        primary_metric: None,
        primary_metric_name: None,
        tags: Vec::new(),
    }
}
