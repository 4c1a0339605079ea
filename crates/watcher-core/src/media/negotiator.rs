use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use crate::config::{DashboardConfig, Endpoints};
use crate::media::{MediaSession, NegotiationError, RenderSink, RenderTarget, SessionNegotiator};

/// Receive-only WHEP client against the media server.
pub struct WhepNegotiator {
    http: Client,
    endpoint: Url,
    ice_servers: Vec<String>,
    gather_timeout: Duration,
}

impl WhepNegotiator {
    pub fn new(endpoint: Url, ice_servers: Vec<String>, gather_timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            ice_servers,
            gather_timeout,
        }
    }

    pub fn from_config(config: &DashboardConfig, endpoints: &Endpoints) -> Self {
        Self::new(
            endpoints.whep.clone(),
            config.ice_servers.clone(),
            config.ice_gather_timeout,
        )
    }

    async fn build_peer(&self) -> Result<RTCPeerConnection, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_err)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(peer_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        api.new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await
        .map_err(peer_err)
    }
}

#[async_trait]
impl SessionNegotiator for WhepNegotiator {
    type Session = WhepSession;

    async fn negotiate(&mut self, render: RenderSink) -> Result<WhepSession, NegotiationError> {
        let peer = Arc::new(self.build_peer().await?);
        // Closes the peer on every early return and on cancellation.
        let guard = PeerGuard::new(peer.clone());

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            peer.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(peer_err)?;
        }

        peer.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let render = render.clone();
                Box::pin(async move {
                    debug!(kind = %track.kind(), id = %track.id(), "remote track arrived");
                    render.send_replace(RenderTarget::RemoteTrack {
                        kind: track.kind().to_string(),
                        id: track.id(),
                    });
                })
            },
        ));

        let (lost_tx, lost_rx) = watch::channel(false);
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                lost_tx.send_replace(true);
            }
            Box::pin(async {})
        }));

        let offer = peer.create_offer(None).await.map_err(peer_err)?;
        let mut gathered = peer.gathering_complete_promise().await;
        peer.set_local_description(offer).await.map_err(peer_err)?;

        if timeout(self.gather_timeout, gathered.recv()).await.is_err() {
            debug!(
                ceiling_ms = self.gather_timeout.as_millis() as u64,
                "ICE gathering incomplete, sending offer with known candidates"
            );
        }

        let local = peer
            .local_description()
            .await
            .ok_or_else(|| NegotiationError::Peer("missing local description".to_string()))?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/sdp")
            .body(local.sdp)
            .send()
            .await
            .map_err(|err| NegotiationError::Signaling(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NegotiationError::Rejected {
                status: status.as_u16(),
            });
        }

        let answer = response
            .text()
            .await
            .map_err(|err| NegotiationError::Signaling(err.to_string()))?;
        let remote = RTCSessionDescription::answer(answer)
            .map_err(|err| NegotiationError::RemoteDescription(err.to_string()))?;
        peer.set_remote_description(remote)
            .await
            .map_err(|err| NegotiationError::RemoteDescription(err.to_string()))?;

        info!(endpoint = %self.endpoint, "WHEP session negotiated");

        Ok(WhepSession {
            guard,
            lost: lost_rx,
        })
    }
}

pub struct WhepSession {
    guard: PeerGuard,
    lost: watch::Receiver<bool>,
}

#[async_trait]
impl MediaSession for WhepSession {
    async fn closed(&mut self) {
        let _ = self.lost.wait_for(|lost| *lost).await;
    }

    async fn close(&mut self) {
        if let Some(peer) = self.guard.take() {
            if let Err(err) = peer.close().await {
                warn!(error = %err, "failed to close peer connection");
            }
        }
    }
}

/// Owns a peer connection until it is handed off or closed.
struct PeerGuard {
    peer: Option<Arc<RTCPeerConnection>>,
}

impl PeerGuard {
    fn new(peer: Arc<RTCPeerConnection>) -> Self {
        Self { peer: Some(peer) }
    }

    fn take(&mut self) -> Option<Arc<RTCPeerConnection>> {
        self.peer.take()
    }
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        let Some(peer) = self.peer.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = peer.close().await {
                        debug!(error = %err, "peer close after teardown failed");
                    }
                });
            }
            Err(_) => warn!("no runtime available to close peer connection"),
        }
    }
}

fn peer_err(err: webrtc::Error) -> NegotiationError {
    NegotiationError::Peer(err.to_string())
}
