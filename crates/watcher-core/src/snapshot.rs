use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub connected: bool,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub reconnect_attempts: u32,
    pub last_frame_at: Option<DateTime<Utc>>,
    #[serde(rename = "rtsp_url")]
    pub source_uri: String,
    pub error: Option<String>,
}

/// Host utilization as reported by the appliance. GPU fields are absent
/// when the host has no GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub cpu_percent: Option<f64>,
    pub ram_percent: Option<f64>,
    pub ram_used_gb: Option<f64>,
    pub ram_total_gb: Option<f64>,
    pub gpu_name: Option<String>,
    pub gpu_percent: Option<f64>,
    pub gpu_memory_percent: Option<f64>,
    pub gpu_temp_c: Option<f64>,
    pub disk_percent: Option<f64>,
    pub disk_used_gb: Option<f64>,
    pub disk_total_gb: Option<f64>,
}

impl SystemHealth {
    pub fn has_gpu(&self) -> bool {
        self.gpu_name.is_some() || self.gpu_percent.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub armed: bool,
    pub uptime_seconds: f64,
    pub stream: StreamStatus,
    pub health: SystemHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: String,
    pub updated: bool,
}

/// One frame pushed over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEvent {
    pub const STREAM_STATUS: &'static str = "stream_status";

    /// Decodes the backend's periodic status push, if this is one.
    pub fn stream_status(&self) -> Option<StreamStatus> {
        if self.kind != Self::STREAM_STATUS {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// What a polling loop publishes: the last good snapshot plus the outcome
/// of the most recent request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolledState<T> {
    pub snapshot: Option<T>,
    pub error: Option<String>,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub polls_ok: u64,
    pub polls_err: u64,
}

impl<T> Default for PolledState<T> {
    fn default() -> Self {
        Self {
            snapshot: None,
            error: None,
            last_ok_at: None,
            polls_ok: 0,
            polls_err: 0,
        }
    }
}

impl<T> PolledState<T> {
    pub fn record_ok(&mut self, snapshot: T) {
        self.snapshot = Some(snapshot);
        self.error = None;
        self.last_ok_at = Some(Utc::now());
        self.polls_ok += 1;
    }

    pub fn record_err(&mut self, reason: String) {
        self.error = Some(reason);
        self.polls_err += 1;
    }
}
