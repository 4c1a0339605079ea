use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::lifecycle::{shutdown_pair, OneShotTimer, ShutdownSignal, ShutdownTrigger};
use crate::snapshot::InboundEvent;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFrame {
    Text(String),
    Binary(Vec<u8>),
    Closed,
    Error(String),
}

#[async_trait]
pub trait ChannelTransport: Send {
    type Connection: ChannelConnection + 'static;

    async fn connect(&mut self, url: &Url) -> Result<Self::Connection, ChannelError>;
}

#[async_trait]
pub trait ChannelConnection: Send {
    /// `None` once the underlying stream is exhausted.
    async fn next_frame(&mut self) -> Option<ChannelFrame>;
    async fn close(&mut self);
}

/// Connection bookkeeping for the channel manager. Each connection attempt
/// gets a generation; events carrying any other generation are stale and
/// ignored.
#[derive(Debug, Clone)]
pub struct ChannelLifecycle {
    active: bool,
    generation: u64,
    connected: bool,
    reconnect_pending: bool,
    reconnect_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Ignore,
    Publish,
}

impl ChannelLifecycle {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            active: true,
            generation: 0,
            connected: false,
            reconnect_pending: false,
            reconnect_delay,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Starts a new attempt, superseding whatever came before.
    pub fn begin_attempt(&mut self) -> Option<u64> {
        if !self.active {
            return None;
        }
        self.generation += 1;
        self.reconnect_pending = false;
        Some(self.generation)
    }

    /// Returns `true` when `connected` flipped to `true`.
    pub fn on_open(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.connected {
            return false;
        }
        self.connected = true;
        true
    }

    /// Marks the connection down. Returns the delay to arm a reconnect with,
    /// or `None` when one is already pending or the manager is torn down.
    pub fn on_close(&mut self, generation: u64) -> Option<Duration> {
        if generation != self.generation {
            return None;
        }
        self.connected = false;
        if !self.active || self.reconnect_pending {
            return None;
        }
        self.reconnect_pending = true;
        Some(self.reconnect_delay)
    }

    /// Errors never retry on their own; they force a close of the current
    /// transport which then goes through `on_close`.
    pub fn on_error(&self, generation: u64) -> bool {
        self.is_current(generation)
    }

    pub fn on_frame(&self, generation: u64) -> FrameAction {
        if self.is_current(generation) {
            FrameAction::Publish
        } else {
            FrameAction::Ignore
        }
    }

    pub fn teardown(&mut self) {
        self.active = false;
        self.connected = false;
        self.reconnect_pending = false;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active && generation == self.generation
    }
}

/// Parses one inbound payload. Anything that is not a `{type, data}` JSON
/// object is dropped.
pub fn parse_event(frame: &ChannelFrame) -> Option<InboundEvent> {
    match frame {
        ChannelFrame::Text(text) => serde_json::from_str(text).ok(),
        ChannelFrame::Binary(bytes) => serde_json::from_slice(bytes).ok(),
        ChannelFrame::Closed | ChannelFrame::Error(_) => None,
    }
}

/// Owning handle for a running channel manager.
#[derive(Debug)]
pub struct ChannelHandle {
    connected: watch::Receiver<bool>,
    last_event: watch::Receiver<Option<InboundEvent>>,
    events: broadcast::Sender<InboundEvent>,
    shutdown: ShutdownTrigger,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn last_event(&self) -> watch::Receiver<Option<InboundEvent>> {
        self.last_event.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn dispose(&self) {
        self.shutdown.trigger();
    }

    pub async fn join(self) {
        self.shutdown.trigger();
        if let Err(err) = self.task.await {
            warn!(error = %err, "channel task ended abnormally");
        }
    }
}

pub fn spawn_channel<T>(transport: T, url: Url, reconnect_delay: Duration) -> ChannelHandle
where
    T: ChannelTransport + 'static,
{
    let (connected_tx, connected_rx) = watch::channel(false);
    let (last_tx, last_rx) = watch::channel(None);
    let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (trigger, signal) = shutdown_pair();

    let manager = ChannelManager {
        transport,
        url,
        lifecycle: ChannelLifecycle::new(reconnect_delay),
        connected: connected_tx,
        last_event: last_tx,
        events: events_tx.clone(),
        shutdown: signal,
    };
    let task = tokio::spawn(manager.run());

    ChannelHandle {
        connected: connected_rx,
        last_event: last_rx,
        events: events_tx,
        shutdown: trigger,
        task,
    }
}

struct ChannelManager<T: ChannelTransport> {
    transport: T,
    url: Url,
    lifecycle: ChannelLifecycle,
    connected: watch::Sender<bool>,
    last_event: watch::Sender<Option<InboundEvent>>,
    events: broadcast::Sender<InboundEvent>,
    shutdown: ShutdownSignal,
}

impl<T: ChannelTransport> ChannelManager<T> {
    async fn run(mut self) {
        let mut reconnect = OneShotTimer::new();
        let mut current: Option<(u64, T::Connection)> = None;

        if let Some(delay) = self.attempt(&mut current).await {
            reconnect.arm(delay);
        }

        while self.lifecycle.is_active() {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    self.lifecycle.teardown();
                }
                _ = reconnect.fired() => {
                    debug!(url = %self.url, "reconnecting");
                    if let Some(delay) = self.attempt(&mut current).await {
                        reconnect.arm(delay);
                    }
                }
                frame = next_frame(&mut current) => {
                    if let Some(delay) = self.handle_frame(&mut current, frame).await {
                        reconnect.arm(delay);
                    }
                }
            }
        }

        reconnect.cancel();
        if let Some((_, mut connection)) = current.take() {
            connection.close().await;
        }
        self.set_connected(false);
        info!(url = %self.url, "channel closed");
    }

    async fn attempt(&mut self, current: &mut Option<(u64, T::Connection)>) -> Option<Duration> {
        if let Some((_, mut stale)) = current.take() {
            stale.close().await;
        }
        let generation = self.lifecycle.begin_attempt()?;

        let result = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                self.lifecycle.teardown();
                return None;
            }
            result = self.transport.connect(&self.url) => result,
        };

        match result {
            Ok(connection) => {
                if self.lifecycle.on_open(generation) {
                    info!(url = %self.url, generation, "channel connected");
                    self.set_connected(true);
                }
                *current = Some((generation, connection));
                None
            }
            Err(err) => {
                warn!(error = %err, "channel connect failed");
                let delay = self.lifecycle.on_close(generation);
                self.set_connected(false);
                delay
            }
        }
    }

    async fn handle_frame(
        &mut self,
        current: &mut Option<(u64, T::Connection)>,
        frame: (u64, Option<ChannelFrame>),
    ) -> Option<Duration> {
        let (generation, frame) = frame;

        match frame {
            Some(ChannelFrame::Error(reason)) => {
                if !self.lifecycle.on_error(generation) {
                    return None;
                }
                warn!(%reason, "channel error, closing transport");
                if let Some((_, mut connection)) = current.take() {
                    connection.close().await;
                }
                self.closed(generation)
            }
            Some(ChannelFrame::Closed) | None => {
                current.take();
                self.closed(generation)
            }
            Some(frame) => {
                if self.lifecycle.on_frame(generation) == FrameAction::Ignore {
                    return None;
                }
                match parse_event(&frame) {
                    Some(event) => {
                        debug!(kind = %event.kind, "channel event");
                        let _ = self.events.send(event.clone());
                        self.last_event.send_replace(Some(event));
                    }
                    None => debug!("dropping malformed channel frame"),
                }
                None
            }
        }
    }

    fn closed(&mut self, generation: u64) -> Option<Duration> {
        let delay = self.lifecycle.on_close(generation);
        self.set_connected(false);
        if delay.is_some() {
            info!(url = %self.url, "channel disconnected");
        }
        delay
    }

    fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }
}

async fn next_frame<C: ChannelConnection>(
    current: &mut Option<(u64, C)>,
) -> (u64, Option<ChannelFrame>) {
    match current {
        Some((generation, connection)) => (*generation, connection.next_frame().await),
        None => std::future::pending().await,
    }
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsTransport;

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelTransport for WsTransport {
    type Connection = WsConnection;

    async fn connect(&mut self, url: &Url) -> Result<WsConnection, ChannelError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(WsConnection { stream })
    }
}

#[async_trait]
impl ChannelConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<ChannelFrame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(ChannelFrame::Text(text)),
                Ok(Message::Binary(bytes)) => return Some(ChannelFrame::Binary(bytes)),
                Ok(Message::Close(_)) => return Some(ChannelFrame::Closed),
                Ok(_) => continue,
                Err(err) => return Some(ChannelFrame::Error(err.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close");
        }
    }
}
