use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::api::{ApiClient, ApiError};
use crate::channel::{spawn_channel, ChannelHandle, WsTransport};
use crate::config::{ConfigError, DashboardConfig, Endpoints};
use crate::media::{
    spawn_player, MediaSessionState, MjpegTransport, PlayerHandle, RenderTarget, WhepNegotiator,
};
use crate::poller::{
    spawn_poller, PollerConfig, PollerHandle, StreamStatusSource, SystemHealthSource,
};
use crate::snapshot::{InboundEvent, PolledState, StreamStatus, SystemHealth};

#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// The three realtime mechanisms, running side by side. None of them waits
/// on another; each publishes its own state.
#[derive(Debug)]
pub struct Dashboard {
    player: PlayerHandle,
    stream_status: PollerHandle<StreamStatus>,
    system_health: PollerHandle<SystemHealth>,
    channel: ChannelHandle,
}

/// Read side of a mounted dashboard, cheap to clone into a renderer.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub media: watch::Receiver<MediaSessionState>,
    pub render: watch::Receiver<RenderTarget>,
    pub stream_status: watch::Receiver<PolledState<StreamStatus>>,
    pub system_health: watch::Receiver<PolledState<SystemHealth>>,
    pub channel_connected: watch::Receiver<bool>,
    pub last_event: watch::Receiver<Option<InboundEvent>>,
}

impl Dashboard {
    pub fn mount(config: &DashboardConfig) -> Result<Self, MountError> {
        let endpoints = config.endpoints()?;
        let api = ApiClient::new(endpoints.api_base.clone(), config.request_timeout)?;
        info!(
            api = %endpoints.api_base,
            events = %endpoints.events,
            whep = %endpoints.whep,
            "mounting dashboard"
        );
        Ok(Self::mount_with(config, &endpoints, api))
    }

    fn mount_with(config: &DashboardConfig, endpoints: &Endpoints, api: ApiClient) -> Self {
        let player = spawn_player(
            WhepNegotiator::from_config(config, endpoints),
            MjpegTransport::new(endpoints.mjpeg.clone()),
            config.fallback_deadline,
        );
        let stream_status = spawn_poller(
            StreamStatusSource(api.clone()),
            PollerConfig::new(config.stream_status_interval, config.request_timeout),
        );
        let system_health = spawn_poller(
            SystemHealthSource(api),
            PollerConfig::new(config.system_health_interval, config.request_timeout),
        );
        let channel = spawn_channel(WsTransport, endpoints.events.clone(), config.reconnect_delay);

        Self::from_parts(player, stream_status, system_health, channel)
    }

    pub fn from_parts(
        player: PlayerHandle,
        stream_status: PollerHandle<StreamStatus>,
        system_health: PollerHandle<SystemHealth>,
        channel: ChannelHandle,
    ) -> Self {
        Self {
            player,
            stream_status,
            system_health,
            channel,
        }
    }

    pub fn view(&self) -> DashboardView {
        DashboardView {
            media: self.player.state(),
            render: self.player.render(),
            stream_status: self.stream_status.state(),
            system_health: self.system_health.state(),
            channel_connected: self.channel.connected(),
            last_event: self.channel.last_event(),
        }
    }

    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn refresh(&self) {
        self.stream_status.refresh();
        self.system_health.refresh();
    }

    pub async fn unmount(self) {
        self.player.dispose();
        self.stream_status.dispose();
        self.system_health.dispose();
        self.channel.dispose();

        self.player.join().await;
        self.stream_status.join().await;
        self.system_health.join().await;
        self.channel.join().await;
        info!("dashboard unmounted");
    }
}
