use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid origin {origin}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
    #[error("unsupported origin scheme: {0}")]
    UnsupportedScheme(String),
    #[error("origin has no host: {0}")]
    MissingHost(String),
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub origin: String,
    pub whep_port: u16,
    pub whep_path: String,
    pub events_path: String,
    pub ice_servers: Vec<String>,
    pub ice_gather_timeout: Duration,
    pub fallback_deadline: Duration,
    pub reconnect_delay: Duration,
    pub stream_status_interval: Duration,
    pub system_health_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            whep_port: 8889,
            whep_path: "/cam/whep".to_string(),
            events_path: "/ws/events".to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            ice_gather_timeout: Duration::from_secs(2),
            fallback_deadline: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(3),
            stream_status_interval: Duration::from_millis(2000),
            system_health_interval: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(2000),
        }
    }
}

/// Every URL the core talks to, derived once from the configured origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: Url,
    pub events: Url,
    pub whep: Url,
    pub mjpeg: Url,
}

impl DashboardConfig {
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let origin = Url::parse(&self.origin).map_err(|err| ConfigError::InvalidOrigin {
            origin: self.origin.clone(),
            reason: err.to_string(),
        })?;

        let ws_scheme = match origin.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let host = origin
            .host_str()
            .ok_or_else(|| ConfigError::MissingHost(self.origin.clone()))?
            .to_string();

        let authority = match origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };

        let parse = |raw: String| {
            Url::parse(&raw).map_err(|err| ConfigError::InvalidOrigin {
                origin: self.origin.clone(),
                reason: err.to_string(),
            })
        };

        let api_base = parse(format!("{}://{authority}/api/", origin.scheme()))?;
        let events = parse(format!(
            "{ws_scheme}://{authority}/{}",
            self.events_path.trim_start_matches('/')
        ))?;
        // The media server's WHEP listener is plain http on the page's hostname.
        let whep = parse(format!(
            "http://{host}:{}/{}",
            self.whep_port,
            self.whep_path.trim_start_matches('/')
        ))?;
        let mjpeg = parse(format!("{}stream/mjpeg", api_base))?;

        Ok(Endpoints {
            api_base,
            events,
            whep,
            mjpeg,
        })
    }
}
