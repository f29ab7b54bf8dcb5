//! Reconnecting live channel.
//!
//! A [`LiveChannel`] owns one logical connection to a live-channel path. It
//! runs as a single tokio task: commands from the handle, socket frames, the
//! reconnect timer and the heartbeat interval are multiplexed in one
//! `select!` loop, so no state is ever touched from two places at once.
//! Reads go through an `ArcSwap` snapshot; everything the owner needs to react
//! to arrives as a [`ChannelEvent`] on a bounded queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use benchdash_protocol::{ClientMessage, Envelope};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace, warn};

use crate::backoff::{JitterSource, RandomJitter, ReconnectPolicy};
use crate::error::TransportError;
use crate::socket::{
    live_url, CloseInfo, Connector, Frame, FrameSink, FrameStream, NO_STATUS_RECEIVED,
};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(25_000);
const EVENT_QUEUE_CAPACITY: usize = 256;
const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: Url,
    /// Open the connection as soon as the channel is spawned.
    pub auto_connect: bool,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
}

impl ChannelConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            auto_connect: true,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Everything needed to open channels on one server, minus the path.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// REST base URL; the live URL keeps its host and port.
    pub base_url: Url,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
}

impl LiveSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn channel_config(&self, path: &str) -> Result<ChannelConfig, TransportError> {
        Ok(ChannelConfig {
            url: live_url(&self.base_url, path)?,
            auto_connect: true,
            auto_reconnect: self.auto_reconnect,
            reconnect: self.reconnect,
            heartbeat_interval: self.heartbeat_interval,
        })
    }
}

/// Point-in-time view of a channel, readable without touching the task.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub status: ConnectionStatus,
    /// Reconnection attempts since the last successful connect or explicit
    /// disconnect.
    pub attempts: u32,
    pub reconnect_pending: bool,
    pub last_message: Option<Envelope>,
    pub last_pong_at: Option<Instant>,
}

impl Default for ChannelSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            reconnect_pending: false,
            last_message: None,
            last_pong_at: None,
        }
    }
}

/// What the owner of a channel gets told about.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status {
        status: ConnectionStatus,
        attempts: u32,
    },
    /// Any inbound envelope except heartbeat acks.
    Message(Envelope),
    Closed(CloseInfo),
    Error(String),
}

enum Command {
    Connect,
    Disconnect,
    Send(String),
    Dispose,
}

/// Handle to a running live channel. Dropping it tears the channel down.
pub struct LiveChannel {
    command_tx: mpsc::UnboundedSender<Command>,
    snapshot: Arc<ArcSwap<ChannelSnapshot>>,
    disposed: AtomicBool,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    /// Spawn a channel task with random backoff jitter.
    pub fn spawn(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
    ) -> (LiveChannel, mpsc::Receiver<ChannelEvent>) {
        Self::spawn_with_jitter(config, connector, Arc::new(RandomJitter))
    }

    pub fn spawn_with_jitter(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        jitter: Arc<dyn JitterSource>,
    ) -> (LiveChannel, mpsc::Receiver<ChannelEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let snapshot = Arc::new(ArcSwap::from_pointee(ChannelSnapshot::default()));

        let task = ChannelTask::new(config, connector, jitter, Arc::clone(&snapshot), event_tx);
        let handle = tokio::spawn(task.run(command_rx));

        (
            LiveChannel {
                command_tx,
                snapshot,
                disposed: AtomicBool::new(false),
                task: Some(handle),
            },
            event_rx,
        )
    }

    /// Open the connection. No-op while connecting or connected.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close with a normal-closure code and stop auto-reconnecting until the
    /// next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Fire-and-forget send. Returns `false` (and drops the payload) unless
    /// the channel is connected.
    pub fn send<T: Serialize>(&self, payload: &T) -> bool {
        if self.status() != ConnectionStatus::Connected {
            warn!(
                component = "transport",
                event = "live.send.dropped",
                status = self.status().as_str(),
                "Live channel not connected, payload dropped"
            );
            return false;
        }
        match serde_json::to_string(payload) {
            Ok(text) => self.command(Command::Send(text)),
            Err(e) => {
                warn!(
                    component = "transport",
                    event = "live.send.serialize_failed",
                    error = %e,
                    "Failed to serialize outbound payload"
                );
                false
            }
        }
    }

    /// Tear everything down. Safe to call any number of times.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send(Command::Dispose);
    }

    /// Dispose and wait until the task has released its socket and timers.
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Arc<ChannelSnapshot> {
        self.snapshot.load_full()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.load().status
    }

    pub fn attempts(&self) -> u32 {
        self.snapshot.load().attempts
    }

    pub fn last_message(&self) -> Option<Envelope> {
        self.snapshot.load().last_message.clone()
    }

    fn command(&self, cmd: Command) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.command_tx.send(cmd).is_ok()
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Channel task
// ---------------------------------------------------------------------------

type PendingConnect = BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>>;

struct ChannelTask {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    jitter: Arc<dyn JitterSource>,
    snapshot: Arc<ArcSwap<ChannelSnapshot>>,
    events: mpsc::Sender<ChannelEvent>,

    status: ConnectionStatus,
    attempts: u32,
    /// Cleared by `disconnect`/dispose, restored by `connect`.
    reconnect_enabled: bool,
    last_message: Option<Envelope>,
    last_pong_at: Option<Instant>,

    pending_connect: Option<PendingConnect>,
    sink: Option<FrameSink>,
    stream: Option<FrameStream>,
    /// At most one pending reconnect at any time.
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
}

impl ChannelTask {
    fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        jitter: Arc<dyn JitterSource>,
        snapshot: Arc<ArcSwap<ChannelSnapshot>>,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        ChannelTask {
            reconnect_enabled: config.auto_reconnect,
            config,
            connector,
            jitter,
            snapshot,
            events,
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            last_message: None,
            last_pong_at: None,
            pending_connect: None,
            sink: None,
            stream: None,
            reconnect_timer: None,
            heartbeat: None,
        }
    }

    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        if self.config.auto_connect {
            self.open().await;
        }

        loop {
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    match command {
                        Some(Command::Connect) => self.connect().await,
                        Some(Command::Disconnect) => self.disconnect().await,
                        Some(Command::Send(text)) => self.send_text(text).await,
                        Some(Command::Dispose) | None => {
                            self.teardown().await;
                            break;
                        }
                    }
                }
                result = next_ready(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.on_connect_result(result).await;
                }
                frame = next_frame(&mut self.stream) => {
                    self.on_frame(frame).await;
                }
                () = next_ready(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.open().await;
                }
                () = next_tick(&mut self.heartbeat) => {
                    self.send_heartbeat().await;
                }
            }
        }

        debug!(
            component = "transport",
            event = "live.task.exited",
            path = self.config.url.path(),
            "Live channel task exited"
        );
    }

    async fn connect(&mut self) {
        if matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            trace!(
                component = "transport",
                event = "live.connect.ignored",
                status = self.status.as_str(),
                "Already connecting or connected"
            );
            return;
        }
        self.reconnect_enabled = self.config.auto_reconnect;
        self.open().await;
    }

    async fn open(&mut self) {
        self.reconnect_timer = None;
        self.set_status(ConnectionStatus::Connecting).await;

        info!(
            component = "transport",
            event = "live.connect.started",
            path = self.config.url.path(),
            attempts = self.attempts,
            "Opening live channel"
        );

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        self.pending_connect = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    async fn on_connect_result(&mut self, result: Result<(FrameSink, FrameStream), TransportError>) {
        match result {
            Ok((sink, stream)) => {
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.attempts = 0;

                self.heartbeat = Some(delayed_interval(self.config.heartbeat_interval));

                info!(
                    component = "transport",
                    event = "live.connect.opened",
                    path = self.config.url.path(),
                    "Live channel connected"
                );
                self.set_status(ConnectionStatus::Connected).await;
            }
            Err(e) => {
                // Mirrors a failed upgrade: error first, then an unclean close.
                self.on_error(e.to_string()).await;
                self.on_close(CloseInfo::abnormal(e.to_string())).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Frame, TransportError>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.on_text(&text).await,
            Some(Ok(Frame::Close(info))) => {
                let info = info.unwrap_or(CloseInfo {
                    code: NO_STATUS_RECEIVED,
                    reason: String::new(),
                    clean: true,
                });
                self.on_close(CloseInfo {
                    clean: true,
                    ..info
                })
                .await;
            }
            Some(Ok(Frame::Ping(_) | Frame::Pong(_) | Frame::Binary(_))) => {}
            Some(Err(e)) => {
                self.on_error(e.to_string()).await;
                self.on_close(CloseInfo::abnormal(e.to_string())).await;
            }
            None => {
                self.on_close(CloseInfo::abnormal("connection dropped"))
                    .await;
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    component = "transport",
                    event = "live.message.malformed",
                    error = %e,
                    bytes = text.len(),
                    "Dropping malformed live message"
                );
                return;
            }
        };

        if envelope.is_pong() {
            self.last_pong_at = Some(Instant::now());
            self.publish();
            trace!(
                component = "transport",
                event = "live.heartbeat.ack",
                "Heartbeat acknowledged"
            );
            return;
        }

        self.last_message = Some(envelope.clone());
        self.publish();
        self.emit(ChannelEvent::Message(envelope)).await;
    }

    async fn on_error(&mut self, message: String) {
        warn!(
            component = "transport",
            event = "live.error",
            path = self.config.url.path(),
            error = %message,
            "Live channel error"
        );
        self.set_status(ConnectionStatus::Error).await;
        self.emit(ChannelEvent::Error(message)).await;
    }

    async fn on_close(&mut self, info: CloseInfo) {
        self.heartbeat = None;
        self.sink = None;
        self.stream = None;
        self.pending_connect = None;

        info!(
            component = "transport",
            event = "live.closed",
            path = self.config.url.path(),
            code = info.code,
            clean = info.clean,
            "Live channel closed"
        );

        self.set_status(ConnectionStatus::Disconnected).await;
        self.emit(ChannelEvent::Closed(info.clone())).await;

        if !self.reconnect_enabled || info.clean {
            return;
        }
        if !self.config.reconnect.should_retry(self.attempts) {
            warn!(
                component = "transport",
                event = "live.reconnect.exhausted",
                path = self.config.url.path(),
                attempts = self.attempts,
                "Giving up on live channel until connect() is called"
            );
            return;
        }

        let delay = self
            .config
            .reconnect
            .delay(self.attempts, self.jitter.as_ref());
        self.attempts += 1;
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        info!(
            component = "transport",
            event = "live.reconnect.scheduled",
            path = self.config.url.path(),
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.publish();
        self.emit(ChannelEvent::Status {
            status: self.status,
            attempts: self.attempts,
        })
        .await;
    }

    async fn disconnect(&mut self) {
        self.reconnect_enabled = false;
        let had_socket = self.release().await;
        self.attempts = 0;
        self.set_status(ConnectionStatus::Disconnected).await;
        if had_socket {
            self.emit(ChannelEvent::Closed(CloseInfo::normal())).await;
        }
        self.publish();
    }

    async fn teardown(&mut self) {
        self.reconnect_enabled = false;
        self.release().await;
        self.status = ConnectionStatus::Disconnected;
        self.attempts = 0;
        self.publish();
    }

    /// Cancel timers and close the socket (if any) with a normal closure.
    async fn release(&mut self) -> bool {
        self.reconnect_timer = None;
        self.heartbeat = None;
        self.pending_connect = None;
        self.stream = None;

        let Some(mut sink) = self.sink.take() else {
            return false;
        };
        let close = async {
            sink.send(Frame::Close(Some(CloseInfo::normal()))).await?;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_SEND_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(
                component = "transport",
                event = "live.close.failed",
                error = %e,
                "Close frame not delivered"
            ),
            Err(_) => debug!(
                component = "transport",
                event = "live.close.timeout",
                "Close frame timed out"
            ),
        }
        true
    }

    async fn send_text(&mut self, text: String) {
        if self.status != ConnectionStatus::Connected {
            warn!(
                component = "transport",
                event = "live.send.dropped",
                status = self.status.as_str(),
                "Live channel not connected, payload dropped"
            );
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(Frame::Text(text)).await {
            warn!(
                component = "transport",
                event = "live.send.failed",
                error = %e,
                "Live channel send failed"
            );
        }
    }

    async fn send_heartbeat(&mut self) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        match serde_json::to_string(&ClientMessage::Ping) {
            Ok(text) => {
                trace!(
                    component = "transport",
                    event = "live.heartbeat.sent",
                    "Heartbeat ping"
                );
                self.send_text(text).await;
            }
            Err(e) => warn!(
                component = "transport",
                event = "live.heartbeat.serialize_failed",
                error = %e,
                "Failed to serialize heartbeat"
            ),
        }
    }

    async fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.publish();
        self.emit(ChannelEvent::Status {
            status,
            attempts: self.attempts,
        })
        .await;
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(ChannelSnapshot {
            status: self.status,
            attempts: self.attempts,
            reconnect_pending: self.reconnect_timer.is_some(),
            last_message: self.last_message.clone(),
            last_pong_at: self.last_pong_at,
        }));
    }

    async fn emit(&mut self, event: ChannelEvent) {
        // The owner may already be gone; that is not an error.
        let _ = self.events.send(event).await;
    }
}

/// Ticks every `period`, the first tick one period from now.
pub(crate) fn delayed_interval(period: Duration) -> Interval {
    // `interval_at` rejects a zero period.
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub(crate) async fn next_ready<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<Frame, TransportError>> {
    match stream.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn next_event<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn next_tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::NoJitter;
    use crate::socket::NORMAL_CLOSURE;
    use crate::test_support::{settle, MockConnector};
    use serde_json::json;

    fn config() -> ChannelConfig {
        ChannelConfig::new(Url::parse("ws://test.local/api/ws/runs/r1").unwrap())
    }

    fn spawn(
        config: ChannelConfig,
        connector: &Arc<MockConnector>,
    ) -> (LiveChannel, mpsc::Receiver<ChannelEvent>) {
        LiveChannel::spawn_with_jitter(config, connector.clone(), Arc::new(NoJitter))
    }

    fn drain(rx: &mut mpsc::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn messages(events: &[ChannelEvent]) -> Vec<&Envelope> {
        events
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::Message(env) => Some(env),
                _ => None,
            })
            .collect()
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn task_future_can_be_spawned() {
        let connector = MockConnector::new();
        let (events, _event_rx) = mpsc::channel(1);
        let (_command_tx, command_rx) = mpsc::unbounded_channel();
        let task = ChannelTask::new(
            config(),
            connector,
            Arc::new(NoJitter),
            Arc::new(ArcSwap::from_pointee(ChannelSnapshot::default())),
            events,
        );
        let run = task.run(command_rx);
        assert_send(&run);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_connect_reaches_connected() {
        let connector = MockConnector::new();
        let (channel, mut rx) = spawn(config(), &connector);
        settle().await;

        assert_eq!(channel.status(), ConnectionStatus::Connected);
        assert_eq!(channel.attempts(), 0);
        assert_eq!(connector.connect_count(), 1);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ChannelEvent::Status {
                    status: ConnectionStatus::Connecting,
                    attempts: 0
                },
                ChannelEvent::Status {
                    status: ConnectionStatus::Connected,
                    attempts: 0
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_while_connecting_or_connected() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        // Still connecting: the task has not run yet.
        channel.connect();
        channel.connect();
        settle().await;
        channel.connect();
        settle().await;

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(channel.attempts(), 0);
        assert_eq!(channel.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_are_forwarded_and_pongs_suppressed() {
        let connector = MockConnector::new();
        let (channel, mut rx) = spawn(config(), &connector);
        settle().await;
        drain(&mut rx);

        let server = connector.server(0);
        server.send_json(json!({"event": "pong", "data": {}}));
        server.send_json(json!({"event": "status", "data": {"status": "running"}}));
        settle().await;

        let events = drain(&mut rx);
        let msgs = messages(&events);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event, "status");

        let snap = channel.snapshot();
        assert!(snap.last_pong_at.is_some());
        assert_eq!(snap.last_message.as_ref().map(|e| e.event.as_str()), Some("status"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_dropped_without_disconnecting() {
        let connector = MockConnector::new();
        let (channel, mut rx) = spawn(config(), &connector);
        settle().await;
        drain(&mut rx);

        connector.server(0).send_text("{not json");
        settle().await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(channel.status(), ConnectionStatus::Connected);
        assert!(channel.last_message().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_on_interval_while_connected() {
        let connector = MockConnector::new();
        let (_channel, _rx) = spawn(config(), &connector);
        settle().await;
        let server = connector.server(0);

        tokio::time::advance(Duration::from_millis(24_999)).await;
        settle().await;
        assert!(server.received_texts().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(server.received_texts(), vec![r#"{"type":"ping"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unclean_close_schedules_backoff_reconnect() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;

        connector.server(0).drop_connection();
        settle().await;
        assert_eq!(channel.status(), ConnectionStatus::Disconnected);
        assert_eq!(channel.attempts(), 1);
        assert!(channel.snapshot().reconnect_pending);

        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(channel.status(), ConnectionStatus::Connected);
        assert_eq!(channel.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_does_not_reconnect() {
        let connector = MockConnector::new();
        let (channel, mut rx) = spawn(config(), &connector);
        settle().await;
        drain(&mut rx);

        connector.server(0).close(NORMAL_CLOSURE);
        settle().await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Closed(info) if info.clean)));

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(channel.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_after_max_attempts() {
        let connector = MockConnector::new();
        connector.refuse_all(true);
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;

        // Longest wait is capped at 30s; give every cycle room to fire.
        for _ in 0..15 {
            tokio::time::advance(Duration::from_secs(31)).await;
            settle().await;
        }

        // Initial attempt plus ten reconnects.
        assert_eq!(connector.connect_count(), 11);
        assert_eq!(channel.attempts(), 10);
        assert_eq!(channel.status(), ConnectionStatus::Disconnected);
        assert!(!channel.snapshot().reconnect_pending);

        // Manual connect is still honored.
        connector.refuse_all(false);
        channel.connect();
        settle().await;
        assert_eq!(connector.connect_count(), 12);
        assert_eq!(channel.status(), ConnectionStatus::Connected);
        assert_eq!(channel.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_reports_error_then_close() {
        let connector = MockConnector::new();
        connector.refuse_all(true);
        let (_channel, mut rx) = spawn(config(), &connector);
        settle().await;

        let events = drain(&mut rx);
        let error_at = events
            .iter()
            .position(|e| matches!(e, ChannelEvent::Error(_)))
            .expect("error event");
        let closed_at = events
            .iter()
            .position(|e| matches!(e, ChannelEvent::Closed(info) if !info.clean))
            .expect("closed event");
        assert!(error_at < closed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_normally_and_resets_attempts() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;
        let server = connector.server(0);

        channel.disconnect();
        settle().await;

        assert_eq!(channel.status(), ConnectionStatus::Disconnected);
        assert_eq!(channel.attempts(), 0);
        assert_eq!(server.close_code(), Some(NORMAL_CLOSURE));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 1);
        assert!(server.received_texts().is_empty(), "no heartbeat after disconnect");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;

        connector.server(0).drop_connection();
        settle().await;
        assert!(channel.snapshot().reconnect_pending);

        channel.disconnect();
        settle().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(channel.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_only_while_connected() {
        let connector = MockConnector::new();
        connector.refuse_all(true);
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;
        assert!(!channel.send(&json!({"type": "subscribe"})));

        connector.refuse_all(false);
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(channel.status(), ConnectionStatus::Connected);

        assert!(channel.send(&json!({"type": "subscribe"})));
        settle().await;
        let server = connector.latest_server();
        assert_eq!(server.received_texts(), vec![r#"{"type":"subscribe"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_is_complete_and_idempotent() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;
        let server = connector.server(0);

        // Leave a reconnect timer pending, then dispose.
        server.drop_connection();
        settle().await;
        assert!(channel.snapshot().reconnect_pending);

        channel.dispose();
        channel.dispose();
        settle().await;
        assert!(channel.is_disposed());

        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 1);

        channel.connect();
        settle().await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_dispose_does_not_reconnect() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;
        let server = connector.server(0);

        channel.shutdown().await;
        assert_eq!(server.close_code(), Some(NORMAL_CLOSURE));

        // Late close from the peer side.
        server.drop_connection();
        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;

        assert_eq!(connector.connect_count(), 1);
        assert!(server.received_texts().is_empty(), "no heartbeat after dispose");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_tears_down() {
        let connector = MockConnector::new();
        let (channel, _rx) = spawn(config(), &connector);
        settle().await;
        let server = connector.server(0);

        drop(channel);
        settle().await;
        assert_eq!(server.close_code(), Some(NORMAL_CLOSURE));

        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;
        assert_eq!(connector.connect_count(), 1);
    }
}
