//! Realtime relay daemon - main entry point
//!
//! Wires the warehouse domain routes into the relay core and supervises
//! one orchestrated run until SIGINT/SIGTERM.

use clap::{Parser, Subcommand};
use relay_core::config::RelayConfig;
use relay_core::observability::init_default_logging;
use relay_core::protocol::{ChatMessageEvent, DeviceStatusEvent, OrderEvent, TopicPattern};
use relay_core::realtime::{BroadcastFanout, RealtimeService, SessionFanout};
use relay_core::transport::mqtt::{BrokerClient, EventBinding, HandlerError};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Realtime event relay for the warehouse platform
#[derive(Parser)]
#[command(name = "relayd")]
#[command(about = "Broker-backed realtime event relay")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting realtime relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Relay shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RelayConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = vec!["relay.toml", "config/relay.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RelayConfig::load_from_file(&path)?);
                }
            }

            error!(
                "No configuration file found. Please provide one with -c/--config or create relay.toml"
            );
            process::exit(1);
        }
    }
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(client_id = %config.broker.client_id, "Relay starting");

    let fanout = Arc::new(BroadcastFanout::new(config.realtime.fanout_capacity));
    let broker = BrokerClient::new(config.broker.clone());
    let mut service = RealtimeService::new(broker);

    register_routes(&mut service, fanout);

    info!(routes = service.route_count(), "Routes registered, relay is running until interrupted");

    service.run(shutdown_signal()).await?;
    Ok(())
}

/// Bind the warehouse domain routes. This is the single place where
/// application logic plugs into the relay core.
fn register_routes(service: &mut RealtimeService<BrokerClient>, fanout: Arc<BroadcastFanout>) {
    let order_fanout = Arc::clone(&fanout);
    service.register(
        EventBinding::<OrderEvent>::new(
            TopicPattern::parse("orders/:order_id/events").expect("static pattern"),
            move |ctx, event| {
                let fanout = Arc::clone(&order_fanout);
                async move {
                    let payload = serde_json::to_string(&event)
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    fanout
                        .deliver(&event.organization_id.to_string(), &payload)
                        .await;
                    info!(
                        topic = %ctx.topic,
                        order_id = %event.order_id,
                        status = ?event.status,
                        "Order event relayed"
                    );
                    Ok(())
                }
            },
        )
        .into_route(),
    );

    let device_fanout = Arc::clone(&fanout);
    service.register(
        EventBinding::<DeviceStatusEvent>::new(
            TopicPattern::parse("devices/:device_id/status").expect("static pattern"),
            move |ctx, event| {
                let fanout = Arc::clone(&device_fanout);
                async move {
                    let payload = serde_json::to_string(&event)
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    fanout.deliver("devices", &payload).await;
                    info!(
                        topic = %ctx.topic,
                        device_id = %event.device_id,
                        online = event.online,
                        "Device status relayed"
                    );
                    Ok(())
                }
            },
        )
        .into_route(),
    );

    let chat_fanout = Arc::clone(&fanout);
    service.register(
        EventBinding::<ChatMessageEvent>::new(
            TopicPattern::parse("chat/:room/messages").expect("static pattern"),
            move |_ctx, event| {
                let fanout = Arc::clone(&chat_fanout);
                async move {
                    let payload = serde_json::to_string(&event)
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    fanout.deliver(&event.room, &payload).await;
                    Ok(())
                }
            },
        )
        .into_route(),
    );
}

/// Resolves when SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    let mut sigint =
        signal::unix::signal(signal::unix::SignalKind::interrupt()).expect("signal handler");
    let mut sigterm =
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("signal handler");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

fn handle_config_command(
    config: RelayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current relay configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
