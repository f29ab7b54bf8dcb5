//! Server → Client messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{LogStream, RunStatus};

/// Every live-channel message from the server is wrapped in an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Heartbeat acknowledgement for a client `ping`.
    pub fn is_pong(&self) -> bool {
        self.event == event_names::PONG
    }
}

/// Event names the server is known to emit.
pub mod event_names {
    pub const STATUS: &str = "status";
    pub const LOG_LINE: &str = "log_line";
    pub const PROGRESS: &str = "progress";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CANCELED: &str = "canceled";
    pub const PONG: &str = "pong";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const CONNECTED: &str = "connected";
    pub const RUN_STATUS: &str = "run_status";
    pub const RUN_CREATED: &str = "run_created";
    pub const RUN_DELETED: &str = "run_deleted";
}

// -- Run channel payloads -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: RunStatus,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLinePayload {
    pub stream: LogStream,
    pub line: String,
}

/// Progress parsed server-side from benchmark stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current: i64,
    pub total: i64,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedPayload {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPayload {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanceledPayload {
    #[serde(default)]
    pub finished_at: Option<String>,
}

// -- Dashboard channel payloads -------------------------------------------------

/// Payload shared by `run_status`, `run_created` and `run_deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunNotice {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
