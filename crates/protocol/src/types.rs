//! Core types shared across the protocol

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Run lifecycle: queued → running → {completed | failed | canceled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    /// No further transitions are expected once a run is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "canceled" | "cancelled" => Ok(RunStatus::Canceled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Which process stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Full run record from `GET /api/runs/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    pub run_id: String,
    pub benchmark: String,
    pub model: String,
    pub status: RunStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub primary_metric: Option<f64>,
    #[serde(default)]
    pub primary_metric_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default, deserialize_with = "deserialize_tail")]
    pub stdout_tail: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_tail")]
    pub stderr_tail: Vec<String>,
    #[serde(default)]
    pub summary: Option<Value>,
}

/// Row in `GET /api/runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub benchmark: String,
    pub model: String,
    pub status: RunStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub primary_metric: Option<f64>,
    #[serde(default)]
    pub primary_metric_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&RunDetail> for RunSummary {
    fn from(run: &RunDetail) -> Self {
        Self {
            run_id: run.run_id.clone(),
            benchmark: run.benchmark.clone(),
            model: run.model.clone(),
            status: run.status,
            created_at: run.created_at.clone(),
            finished_at: run.finished_at.clone(),
            primary_metric: run.primary_metric,
            primary_metric_name: run.primary_metric_name.clone(),
            tags: run.tags.clone(),
        }
    }
}

/// Body of `POST /api/runs`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCreate {
    pub benchmark: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCreated {
    pub run_id: String,
}

/// Query filters for `GET /api/runs`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRunsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Generic `{"status": "..."}` acknowledgement (cancel, delete)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub status: String,
}

/// `POST /api/runs/bulk-delete`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    pub status: String,
    #[serde(default)]
    pub details: BulkDeleteDetails,
}

/// Run ids grouped by what the server did with them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkDeleteDetails {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    /// Skipped: a running run must be canceled first.
    pub running: Vec<String>,
    pub not_found: Vec<String>,
}

/// `GET /api/health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Structured error envelope returned by the backend on non-2xx responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
}

/// Split a log tail snapshot into lines.
///
/// An empty snapshot yields no lines and a trailing newline does not produce
/// an empty last line.
pub fn split_tail(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TailRepr {
    Text(String),
    Lines(Vec<String>),
}

/// Log tails arrive either as one newline-joined string or as an array of lines.
fn deserialize_tail<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<TailRepr>::deserialize(deserializer)?;
    Ok(match repr {
        None => Vec::new(),
        Some(TailRepr::Text(text)) => split_tail(&text),
        Some(TailRepr::Lines(lines)) => lines,
    })
}
