//! Benchdash Client
//!
//! Live-update synchronization for the benchmark dashboard: a reconnecting
//! WebSocket channel, the REST fallback, and the run-detail and dashboard
//! view-models built on top of them.

pub mod backoff;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod paths;
pub mod rest;
pub mod router;
pub mod run_detail;
pub mod session;
pub mod socket;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use backoff::{JitterSource, NoJitter, RandomJitter, ReconnectPolicy};
pub use config::ClientConfig;
pub use dashboard::{DashboardConfig, DashboardHandle, DashboardState, DeleteReport};
pub use error::{ApiError, ConfigError, ErrorPresentation, TransportError};
pub use paths::DataDir;
pub use rest::{RestClient, RunsApi};
pub use router::{route_dashboard_event, route_run_event, DashboardEvent, RunEvent};
pub use run_detail::{Notice, Phase, RunDetailConfig, RunDetailHandle, RunView};
pub use session::Session;
pub use socket::{CloseInfo, Connector, WsConnector};
pub use transport::{ChannelEvent, ConnectionStatus, LiveChannel, LiveSettings};
