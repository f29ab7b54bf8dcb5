//! Client → Server messages

use serde::{Deserialize, Serialize};

/// Messages sent from client to server over the live channel.
///
/// Outbound frames use a flat `type` tag, unlike the `{event, data}`
/// envelope the server pushes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive; the server answers with a `pong` envelope.
    Ping,
}
