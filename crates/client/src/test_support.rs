//! In-memory doubles for the socket and the REST API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use benchdash_protocol::{
    BulkDeleteDetails, ListRunsQuery, RunCreate, RunCreated, RunDetail, RunStatus, RunSummary,
};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use reqwest::Url;

use crate::error::{ApiError, TransportError};
use crate::rest::RunsApi;
use crate::socket::{CloseInfo, Connector, Frame, FrameSink, FrameStream};

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConnectorState {
    refuse: bool,
    urls: Vec<Url>,
    servers: Vec<MockServer>,
}

#[derive(Default)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every connect while set.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    /// Connect attempts, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().unwrap().urls.clone()
    }

    /// Server side of the `index`-th accepted connection.
    pub fn server(&self, index: usize) -> MockServer {
        self.state.lock().unwrap().servers[index].clone()
    }

    pub fn latest_server(&self) -> MockServer {
        let state = self.state.lock().unwrap();
        state.servers.last().cloned().expect("no accepted connection")
    }

    pub fn accepted(&self) -> usize {
        self.state.lock().unwrap().servers.len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.clone());
        if state.refuse {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (to_client, from_server) = unbounded::<Result<Frame, TransportError>>();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        let sink = futures::sink::unfold(log, |log, frame: Frame| async move {
            log.lock().unwrap().push(frame);
            Ok::<_, TransportError>(log)
        });

        state.servers.push(MockServer {
            to_client,
            received,
        });

        let stream: FrameStream = Box::pin(from_server);
        Ok((Box::pin(sink), stream))
    }
}

/// Server end of one in-memory connection.
#[derive(Clone)]
pub struct MockServer {
    to_client: UnboundedSender<Result<Frame, TransportError>>,
    received: Arc<Mutex<Vec<Frame>>>,
}

impl MockServer {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(Frame::Text(text.to_string())));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_event(&self, event: &str, data: serde_json::Value) {
        self.send_json(serde_json::json!({ "event": event, "data": data }));
    }

    /// Close handshake from the server side.
    pub fn close(&self, code: u16) {
        let _ = self.to_client.unbounded_send(Ok(Frame::Close(Some(CloseInfo {
            code,
            reason: String::new(),
            clean: true,
        }))));
        self.to_client.close_channel();
    }

    /// End the stream without a close frame.
    pub fn drop_connection(&self) {
        self.to_client.close_channel();
    }

    /// Text frames the client sent, in order.
    pub fn received_texts(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Code of the close frame the client sent, if any.
    pub fn close_code(&self) -> Option<u16> {
        self.received.lock().unwrap().iter().find_map(|f| match f {
            Frame::Close(Some(info)) => Some(info.code),
            Frame::Close(None) => Some(crate::socket::NO_STATUS_RECEIVED),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    runs: HashMap<String, Result<RunDetail, ApiError>>,
    get_calls: Vec<String>,
    list: Option<Result<Vec<RunSummary>, ApiError>>,
    list_calls: Vec<ListRunsQuery>,
    delete_errors: HashMap<String, ApiError>,
    bulk_error: Option<ApiError>,
    bulk_calls: Vec<Vec<String>>,
    deleted: Vec<String>,
    canceled: Vec<String>,
}

/// Canned `RunsApi`: answers from whatever was last set.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<ApiState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_run(&self, run: RunDetail) {
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run.run_id.clone(), Ok(run));
    }

    pub fn set_run_error(&self, run_id: &str, err: ApiError) {
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run_id.to_string(), Err(err));
    }

    pub fn set_list(&self, runs: Vec<RunSummary>) {
        self.state.lock().unwrap().list = Some(Ok(runs));
    }

    pub fn set_list_error(&self, err: ApiError) {
        self.state.lock().unwrap().list = Some(Err(err));
    }

    pub fn fail_delete(&self, run_id: &str, err: ApiError) {
        let mut state = self.state.lock().unwrap();
        state.delete_errors.insert(run_id.to_string(), err);
    }

    /// Fail the whole bulk-delete request.
    pub fn fail_bulk_delete(&self, err: ApiError) {
        self.state.lock().unwrap().bulk_error = Some(err);
    }

    /// Drop a run server-side only; local lists keep it until they refetch.
    pub fn forget(&self, run_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.runs.remove(run_id);
        if let Some(Ok(runs)) = state.list.as_mut() {
            runs.retain(|r| r.run_id != run_id);
        }
    }

    pub fn bulk_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().bulk_calls.clone()
    }

    pub fn get_count(&self, run_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.get_calls.iter().filter(|id| *id == run_id).count()
    }

    pub fn list_calls(&self) -> Vec<ListRunsQuery> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.state.lock().unwrap().canceled.clone()
    }
}

#[async_trait]
impl RunsApi for FakeApi {
    async fn get_run(&self, run_id: &str) -> Result<RunDetail, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.get_calls.push(run_id.to_string());
        state.runs.get(run_id).cloned().unwrap_or_else(|| {
            Err(ApiError::Status {
                status: 404,
                code: Some("RUN_NOT_FOUND".into()),
                message: format!("Run not found: {run_id}"),
            })
        })
    }

    async fn list_runs(&self, query: &ListRunsQuery) -> Result<Vec<RunSummary>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push(query.clone());
        state.list.clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn create_run(&self, request: &RunCreate) -> Result<RunCreated, ApiError> {
        let run = run_detail("created", RunStatus::Queued, "");
        let mut state = self.state.lock().unwrap();
        state.runs.insert(
            run.run_id.clone(),
            Ok(RunDetail {
                benchmark: request.benchmark.clone(),
                model: request.model.clone(),
                ..run
            }),
        );
        Ok(RunCreated {
            run_id: "created".into(),
        })
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError> {
        self.state.lock().unwrap().canceled.push(run_id.to_string());
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.delete_errors.get(run_id) {
            return Err(err.clone());
        }
        state.deleted.push(run_id.to_string());
        state.runs.remove(run_id);
        Ok(())
    }

    /// Running runs are skipped, unknown ids are `not_found`, runs set up
    /// with `fail_delete` land in `failed`.
    async fn bulk_delete_runs(&self, run_ids: &[String]) -> Result<BulkDeleteDetails, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.bulk_calls.push(run_ids.to_vec());
        if let Some(err) = &state.bulk_error {
            return Err(err.clone());
        }

        let mut details = BulkDeleteDetails::default();
        for run_id in run_ids {
            let listed = match &state.list {
                Some(Ok(runs)) => runs.iter().find(|r| &r.run_id == run_id).map(|r| r.status),
                _ => None,
            };
            let status = listed.or_else(|| match state.runs.get(run_id) {
                Some(Ok(run)) => Some(run.status),
                _ => None,
            });
            match status {
                None => details.not_found.push(run_id.clone()),
                Some(RunStatus::Running) => details.running.push(run_id.clone()),
                Some(_) if state.delete_errors.contains_key(run_id) => {
                    details.failed.push(run_id.clone())
                }
                Some(_) => {
                    state.deleted.push(run_id.clone());
                    state.runs.remove(run_id);
                    if let Some(Ok(runs)) = state.list.as_mut() {
                        runs.retain(|r| &r.run_id != run_id);
                    }
                    details.deleted.push(run_id.clone());
                }
            }
        }
        Ok(details)
    }
}

/// A run record with `stdout_tail` split from `tail`.
pub fn run_detail(run_id: &str, status: RunStatus, tail: &str) -> RunDetail {
    RunDetail {
        run_id: run_id.to_string(),
        benchmark: "mmlu".into(),
        model: "openai/gpt-4o".into(),
        status,
        created_at: Some("2024-01-01T00:00:00Z".into()),
        started_at: None,
        finished_at: None,
        exit_code: None,
        error: None,
        primary_metric: None,
        primary_metric_name: None,
        tags: Vec::new(),
        artifacts: Vec::new(),
        command: None,
        stdout_tail: benchdash_protocol::split_tail(tail),
        stderr_tail: Vec::new(),
        summary: None,
    }
}

pub fn run_summary(run_id: &str, status: RunStatus) -> RunSummary {
    RunSummary::from(&run_detail(run_id, status, ""))
}
