use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdm_console::config::ConfigStore;
use sdm_console::http::ReqwestTransport;
use sdm_console::state::AppState;
use sdm_console::web;
use sdm_console::webrtc::{WebRtcConfig, WebRtcPeerFactory};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "sdm-console")]
#[command(version, about = "Local console for the Smart Device Management API", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory path (default: $SDM_CONSOLE_DATA_DIR or ./data)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Externally visible origin used for the OAuth redirect URI
    #[arg(long, value_name = "URL")]
    public_url: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting sdm-console v{}", env!("CARGO_PKG_VERSION"));

    // Determine data directory (CLI arg takes precedence)
    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    // Initialize configuration store
    let db_path = data_dir.join("sdm-console.db");
    let config_store = ConfigStore::new(&db_path).await?;

    // Apply CLI overrides; they are persisted like any other change
    if args.address.is_some() || args.port.is_some() || args.public_url.is_some() {
        config_store
            .update(|config| {
                if let Some(ref address) = args.address {
                    config.web.bind_address = address.clone();
                }
                if let Some(port) = args.port {
                    config.web.http_port = port;
                }
                if let Some(ref url) = args.public_url {
                    config.web.public_url = url.clone();
                }
            })
            .await?;
    }
    let config = config_store.get();
    if config.credentials.project_id.is_empty() {
        tracing::warn!("No Device Access project configured; set one through /api/config");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = AppState::new(
        config_store.clone(),
        Arc::new(config_store),
        Arc::new(ReqwestTransport::new()),
        Arc::new(WebRtcPeerFactory::new(WebRtcConfig::from(&config.webrtc))),
        shutdown_tx.clone(),
    );
    state.restore().await?;
    tracing::info!(
        "Session restored (signed in: {}, subscription: {:?})",
        state.tokens.signed_in(),
        state.poller.state()
    );

    // Event poller runs until shutdown
    tokio::spawn(state.poller.clone().run(state.shutdown_signal()));

    // Page-load chain against the persisted tokens
    {
        let state = state.clone();
        tokio::spawn(async move {
            state.startup().await;
        });
    }

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("OAuth redirect URI: {}", config.web.redirect_uri());

    let app = web::create_router(state.clone());

    // Setup graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    cleanup(&state).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "sdm_console=error,tower_http=error",
        LogLevel::Warn => "sdm_console=warn,tower_http=warn",
        LogLevel::Info => "sdm_console=info,tower_http=info",
        LogLevel::Verbose => "sdm_console=debug,tower_http=info",
        LogLevel::Debug => "sdm_console=debug,tower_http=debug",
        LogLevel::Trace => "sdm_console=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SDM_CONSOLE_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("./data")
}

/// Stop the live stream and release the preview before exiting
async fn cleanup(state: &Arc<AppState>) {
    state.devices.stop_live_stream().await;
    if let Err(e) = state.stream.stop().await {
        tracing::warn!("Failed to stop stream session: {}", e);
    }
}
