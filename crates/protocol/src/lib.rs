//! Benchdash Protocol
//!
//! Shared types for communication between the benchmark dashboard backend and
//! its clients. Live-channel messages are JSON envelopes over WebSocket; the
//! REST records are the shapes returned by `/api/runs`.

pub mod client;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use server::*;
pub use types::*;
