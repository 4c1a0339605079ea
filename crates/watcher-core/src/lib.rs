pub mod api;
pub mod channel;
pub mod config;
pub mod dashboard;
pub mod lifecycle;
pub mod media;
pub mod poller;
pub mod snapshot;

pub use api::{ApiClient, ApiError};
pub use channel::{spawn_channel, ChannelHandle, ChannelLifecycle, WsTransport};
pub use config::{ConfigError, DashboardConfig, Endpoints};
pub use dashboard::{Dashboard, DashboardView, MountError};
pub use lifecycle::{shutdown_pair, OneShotTimer, ShutdownSignal, ShutdownTrigger};
pub use media::{MediaSessionState, PlayerHandle, RenderTarget};
pub use poller::{spawn_poller, PollerConfig, PollerHandle};
pub use snapshot::{
    ConfigResponse, ConfigUpdate, InboundEvent, PolledState, StreamStatus, SystemHealth,
    SystemStatus,
};

#[cfg(test)]
mod channel_tests;
#[cfg(test)]
mod lifecycle_tests;
#[cfg(test)]
mod test_support;
