//! evstream - real-time event stream client entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Resilient, authenticated event-stream client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via EVSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the WebSocket URL from the config file
    #[arg(long)]
    url: Option<String>,

    /// Event type to subscribe to ("*" for all); repeatable, replaces the configured list
    #[arg(short = 'e', long = "event-type")]
    event_type: Vec<String>,

    /// Print Prometheus metrics to stdout on exit
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    evstream_ws::init_crypto();

    // Parse command line arguments
    let args = Args::parse();

    // Determine config path: CLI arg > EVSTREAM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("EVSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let mut config = evstream_cli::AppConfig::from_file(&config_path)?;
    config.apply_overrides(args.url, args.event_type);
    config.validate()?;

    // Initialize logging
    evstream_telemetry::init_logging(&config.telemetry.log_level)?;

    info!("Starting evstream v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        url = %config.websocket.url,
        event_types = ?config.subscriptions.event_types,
        "Configuration loaded"
    );

    let mut app = evstream_cli::Application::new(config)?;
    app.run().await?;

    if args.print_metrics {
        print!("{}", evstream_telemetry::Metrics::render()?);
    }

    Ok(())
}
