//! Event routing: raw envelopes in, typed events out.
//!
//! The router is a pair of pure functions so it can be tested without a
//! socket. Anything it does not recognize comes back as `None`.

use benchdash_protocol::{
    event_names, CanceledPayload, CompletedPayload, Envelope, FailedPayload, LogLinePayload,
    Progress, RunNotice, StatusPayload,
};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

/// Events on a single run's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Status(StatusPayload),
    LogLine(LogLinePayload),
    Progress(Progress),
    Completed(CompletedPayload),
    Failed(FailedPayload),
    Canceled(CanceledPayload),
}

impl RunEvent {
    /// `completed`, `failed` and `canceled` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Completed(_) | RunEvent::Failed(_) | RunEvent::Canceled(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Status(_) => event_names::STATUS,
            RunEvent::LogLine(_) => event_names::LOG_LINE,
            RunEvent::Progress(_) => event_names::PROGRESS,
            RunEvent::Completed(_) => event_names::COMPLETED,
            RunEvent::Failed(_) => event_names::FAILED,
            RunEvent::Canceled(_) => event_names::CANCELED,
        }
    }
}

/// Events on the dashboard channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    RunStatus(RunNotice),
    RunCreated(RunNotice),
    RunDeleted(RunNotice),
}

impl DashboardEvent {
    pub fn notice(&self) -> &RunNotice {
        match self {
            DashboardEvent::RunStatus(n)
            | DashboardEvent::RunCreated(n)
            | DashboardEvent::RunDeleted(n) => n,
        }
    }
}

pub fn route_run_event(envelope: &Envelope) -> Option<RunEvent> {
    let event = match envelope.event.as_str() {
        event_names::STATUS => RunEvent::Status(payload(envelope)?),
        event_names::LOG_LINE => RunEvent::LogLine(payload(envelope)?),
        event_names::PROGRESS => RunEvent::Progress(payload(envelope)?),
        event_names::COMPLETED => RunEvent::Completed(payload(envelope)?),
        event_names::FAILED => RunEvent::Failed(payload(envelope)?),
        event_names::CANCELED => RunEvent::Canceled(payload(envelope)?),
        other => {
            trace!(
                component = "router",
                event = "router.run.ignored",
                name = other,
                "Ignoring unrecognized run event"
            );
            return None;
        }
    };
    Some(event)
}

pub fn route_dashboard_event(envelope: &Envelope) -> Option<DashboardEvent> {
    let event = match envelope.event.as_str() {
        event_names::RUN_STATUS => DashboardEvent::RunStatus(payload(envelope)?),
        event_names::RUN_CREATED => DashboardEvent::RunCreated(payload(envelope)?),
        event_names::RUN_DELETED => DashboardEvent::RunDeleted(payload(envelope)?),
        other => {
            trace!(
                component = "router",
                event = "router.dashboard.ignored",
                name = other,
                "Ignoring unrecognized dashboard event"
            );
            return None;
        }
    };
    Some(event)
}

fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Option<T> {
    match serde_json::from_value(envelope.data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(
                component = "router",
                event = "router.payload.malformed",
                name = %envelope.event,
                error = %e,
                "Dropping event with unexpected payload shape"
            );
            None
        }
    }
}
