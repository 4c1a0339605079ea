use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watcher_core::config::{DEFAULT_ORIGIN, DEFAULT_STUN_SERVER};
use watcher_core::{spawn_channel, ApiClient, Dashboard, DashboardConfig, WsTransport};

mod render;
mod viewer;

#[derive(Debug, Parser)]
#[command(name = "watcher")]
#[command(about = "Realtime connectivity client for the camera appliance")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "WATCHER_ORIGIN", default_value = DEFAULT_ORIGIN)]
    origin: String,

    #[arg(long, default_value_t = 8889)]
    whep_port: u16,

    #[arg(long = "stun")]
    stun_servers: Vec<String>,

    #[arg(long, default_value_t = 2000)]
    ice_gather_timeout_ms: u64,

    #[arg(long, default_value_t = 5000)]
    fallback_deadline_ms: u64,

    #[arg(long, default_value_t = 3000)]
    reconnect_delay_ms: u64,

    #[arg(long, default_value_t = 2000)]
    stream_status_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    system_health_interval_ms: u64,

    #[arg(long, default_value_t = 2000)]
    request_timeout_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Current camera stream status.
    Status {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Host utilization.
    Health {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Combined system status.
    System {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Save the current frame as JPEG.
    Snapshot {
        #[arg(long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Follow the realtime event channel.
    Events {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Mount the dashboard and print every state change.
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Terminal dashboard.
    View {
        #[arg(long, default_value_t = 180.0)]
        window_sec: f64,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Get { key: Option<String> },
    Set { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

impl Cli {
    fn dashboard_config(&self) -> DashboardConfig {
        let ice_servers = if self.stun_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            self.stun_servers.clone()
        };

        DashboardConfig {
            origin: self.origin.clone(),
            whep_port: self.whep_port,
            ice_servers,
            ice_gather_timeout: Duration::from_millis(self.ice_gather_timeout_ms),
            fallback_deadline: Duration::from_millis(self.fallback_deadline_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            stream_status_interval: Duration::from_millis(self.stream_status_interval_ms),
            system_health_interval: Duration::from_millis(self.system_health_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..DashboardConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.dashboard_config();
    let endpoints = config.endpoints()?;
    let api = ApiClient::new(endpoints.api_base.clone(), config.request_timeout)?;

    match cli.command {
        Command::Status { format } => {
            let status = api.stream_status().await?;
            emit(&status, format, render::stream_status)?;
        }
        Command::Health { format } => {
            let health = api.system_health().await?;
            emit(&health, format, render::system_health)?;
        }
        Command::System { format } => {
            let system = api.system_status().await?;
            emit(&system, format, render::system_status)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Get { key: None } => {
                let config = api.config().await?;
                println!("{}", serde_json::to_string_pretty(&config.config)?);
            }
            ConfigAction::Get { key: Some(key) } => {
                let entry = api.config_value(&key).await?;
                println!("{}", entry.value);
            }
            ConfigAction::Set { key, value } => {
                let update = api.update_config(&key, &value).await?;
                info!(key = %update.key, updated = update.updated, "config written");
                println!("{} = {}", update.key, update.value);
            }
        },
        Command::Snapshot { output } => {
            let jpeg = api.snapshot().await?;
            std::fs::write(&output, &jpeg)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("saved {} bytes to {}", jpeg.len(), output.display());
        }
        Command::Events { format } => {
            let channel = spawn_channel(WsTransport, endpoints.events, config.reconnect_delay);
            let mut events = channel.subscribe();
            let mut connected = channel.connected();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        warn!("received ctrl-c, stopping");
                        break;
                    }
                    changed = connected.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let live = *connected.borrow_and_update();
                        info!(connected = live, "realtime channel");
                    }
                    event = events.recv() => match event {
                        Ok(event) => emit(&event, format, render::inbound_event)?,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event subscriber lagged")
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }

            channel.join().await;
        }
        Command::Watch { format } => {
            let dashboard = Dashboard::mount(&config)?;
            let result = watch_loop(&dashboard, format).await;
            dashboard.unmount().await;
            result?;
        }
        Command::View { window_sec } => {
            let dashboard = Dashboard::mount(&config)?;
            let result = viewer::run_viewer(&dashboard, window_sec).await;
            dashboard.unmount().await;
            result?;
        }
    }

    Ok(())
}

async fn watch_loop(dashboard: &Dashboard, format: OutputFormat) -> Result<()> {
    let mut view = dashboard.view();
    emit(&*view.media.borrow_and_update(), format, render::media_state)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            changed = view.media.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *view.media.borrow_and_update();
                emit(&state, format, render::media_state)?;
            }
            changed = view.stream_status.changed() => {
                if changed.is_err() {
                    break;
                }
                let polled = view.stream_status.borrow_and_update().clone();
                emit(&polled, format, render::polled_stream_status)?;
            }
            changed = view.system_health.changed() => {
                if changed.is_err() {
                    break;
                }
                let polled = view.system_health.borrow_and_update().clone();
                emit(&polled, format, render::polled_system_health)?;
            }
            changed = view.channel_connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let live = *view.channel_connected.borrow_and_update();
                emit(&serde_json::json!({ "channel_connected": live }), format, |_| {
                    render::channel_indicator(live).to_string()
                })?;
            }
            changed = view.last_event.changed() => {
                if changed.is_err() {
                    break;
                }
                let event = view.last_event.borrow_and_update().clone();
                if let Some(event) = event {
                    emit(&event, format, render::inbound_event)?;
                }
            }
        }
    }

    Ok(())
}

fn emit<T: Serialize>(
    value: &T,
    format: OutputFormat,
    human: impl FnOnce(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Human => println!("{}", human(value)),
    }
    Ok(())
}
