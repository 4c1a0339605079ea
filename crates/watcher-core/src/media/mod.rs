pub mod mjpeg;
pub mod negotiator;
pub mod selector;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

pub use mjpeg::{MjpegParser, MjpegTransport};
pub use negotiator::{WhepNegotiator, WhepSession};
pub use selector::{spawn_player, Episode, PlayerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSessionState {
    Negotiating,
    LiveNegotiated,
    LiveDegraded,
    Disconnected,
}

impl MediaSessionState {
    pub fn label(&self) -> &'static str {
        match self {
            MediaSessionState::Negotiating => "Connecting...",
            MediaSessionState::LiveNegotiated => "WebRTC",
            MediaSessionState::LiveDegraded => "MJPEG",
            MediaSessionState::Disconnected => "Disconnected",
        }
    }
}

/// What the presentation layer should currently draw.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RenderTarget {
    #[default]
    None,
    RemoteTrack { kind: String, id: String },
    MjpegFrame { sequence: u64, jpeg: Bytes },
}

pub type RenderSink = Arc<watch::Sender<RenderTarget>>;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("peer setup failed: {0}")]
    Peer(String),
    #[error("signaling request failed: {0}")]
    Signaling(String),
    #[error("WHEP {status}")]
    Rejected { status: u16 },
    #[error("remote description rejected: {0}")]
    RemoteDescription(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("API {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("malformed multipart stream: {0}")]
    Malformed(String),
    #[error("stream ended")]
    Ended,
}

/// A live low-latency session. Dropping it must release the underlying
/// peer resources.
#[async_trait]
pub trait MediaSession: Send {
    /// Resolves when the session is lost on the remote side.
    async fn closed(&mut self);
    async fn close(&mut self);
}

/// Performs exactly one negotiation attempt. Owns no retry policy.
#[async_trait]
pub trait SessionNegotiator: Send {
    type Session: MediaSession + 'static;

    async fn negotiate(&mut self, render: RenderSink) -> Result<Self::Session, NegotiationError>;
}

/// The pull-based fallback used once negotiation is abandoned. `pull`
/// returns only when the stream is lost.
#[async_trait]
pub trait DegradedTransport: Send {
    async fn pull(&mut self, render: RenderSink) -> Result<(), TransportError>;
}
