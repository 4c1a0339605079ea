use watcher_core::{
    InboundEvent, MediaSessionState, PolledState, StreamStatus, SystemHealth, SystemStatus,
};

pub fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}%"),
        None => "n/a".to_string(),
    }
}

pub fn gigabytes(used: Option<f64>, total: Option<f64>) -> String {
    match (used, total) {
        (Some(used), Some(total)) => format!("{used:.1}/{total:.1} GB"),
        _ => "n/a".to_string(),
    }
}

pub fn channel_indicator(connected: bool) -> &'static str {
    if connected {
        "Live"
    } else {
        "Offline"
    }
}

pub fn media_state(state: &MediaSessionState) -> String {
    format!("Media:      {}", state.label())
}

pub fn stream_status(status: &StreamStatus) -> String {
    let mut out = format!(
        "Stream:     {} {}x{} @ {:.1} fps  source={}",
        if status.connected { "connected" } else { "disconnected" },
        status.width,
        status.height,
        status.fps,
        status.source_uri,
    );
    if status.reconnect_attempts > 0 {
        out.push_str(&format!("  reconnects={}", status.reconnect_attempts));
    }
    if let Some(at) = status.last_frame_at {
        out.push_str(&format!("  last_frame={}", at.to_rfc3339()));
    }
    if let Some(err) = &status.error {
        out.push_str(&format!("  error={err}"));
    }
    out
}

pub fn system_health(health: &SystemHealth) -> String {
    let mut out = format!(
        "Health:     cpu={} ram={} ({}) disk={} ({})",
        percent(health.cpu_percent),
        percent(health.ram_percent),
        gigabytes(health.ram_used_gb, health.ram_total_gb),
        percent(health.disk_percent),
        gigabytes(health.disk_used_gb, health.disk_total_gb),
    );
    if health.has_gpu() {
        out.push_str(&format!(
            " gpu={} [{}] vram={}",
            percent(health.gpu_percent),
            health.gpu_name.as_deref().unwrap_or("unknown"),
            percent(health.gpu_memory_percent),
        ));
        if let Some(temp) = health.gpu_temp_c {
            out.push_str(&format!(" {temp:.0}C"));
        }
    }
    out
}

pub fn system_status(system: &SystemStatus) -> String {
    format!(
        "System:     armed={} uptime={}\n{}\n{}",
        system.armed,
        uptime(system.uptime_seconds),
        stream_status(&system.stream),
        system_health(&system.health),
    )
}

pub fn uptime(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, rest) = (total / 3600, total % 3600);
    format!("{hours}h{:02}m{:02}s", rest / 60, rest % 60)
}

fn polled<T>(state: &PolledState<T>, describe: impl Fn(&T) -> String) -> String {
    let mut out = match &state.snapshot {
        Some(snapshot) => describe(snapshot),
        None => "(no data yet)".to_string(),
    };
    if let Some(err) = &state.error {
        out.push_str(&format!("  [last poll failed: {err}]"));
    }
    out
}

pub fn polled_stream_status(state: &PolledState<StreamStatus>) -> String {
    polled(state, stream_status)
}

pub fn polled_system_health(state: &PolledState<SystemHealth>) -> String {
    polled(state, system_health)
}

pub fn inbound_event(event: &InboundEvent) -> String {
    match event.stream_status() {
        Some(status) => format!("Event:      {}", stream_status(&status)),
        None => format!("Event:      {} {}", event.kind, event.data),
    }
}
