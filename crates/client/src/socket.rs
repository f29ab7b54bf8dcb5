//! Socket seam for the live channel.
//!
//! The transport never touches tungstenite directly; it asks a [`Connector`]
//! for a frame sink/stream pair. [`WsConnector`] is the real WebSocket
//! implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// Close code sent on every client-initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the peer closed without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Reported when a close frame carried no status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// A closing handshake happened (close frame seen), as opposed to the
    /// connection just dropping.
    pub clean: bool,
}

impl CloseInfo {
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: String::new(),
            clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            clean: false,
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Opens one live-channel connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| futures::future::ready(Ok::<_, TransportError>(frame.into())));
        let stream = stream.map(|item| item.map(Frame::from).map_err(TransportError::from));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(data) => Frame::Ping(data.to_vec()),
            Message::Pong(data) => Frame::Pong(data.to_vec()),
            Message::Close(frame) => Frame::Close(frame.map(|f| CloseInfo {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_owned(),
                clean: true,
            })),
            Message::Frame(_) => Frame::Binary(Vec::new()),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(data) => Message::binary(data),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close(info) => Message::Close(info.map(|info| CloseFrame {
                code: CloseCode::from(info.code),
                reason: info.reason.into(),
            })),
        }
    }
}

/// Derive the live-channel URL from the REST base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; host and port are kept;
/// `path` replaces the base path and always starts with `/`. Query and
/// fragment are dropped; credentials never go into the URL.
pub fn live_url(base: &Url, path: &str) -> Result<Url, TransportError> {
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other}"
            )))
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(base.to_string()))?;

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
