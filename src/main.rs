use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_gadgetd::config::ConfigStore;
use usb_gadgetd::events::EventBus;
use usb_gadgetd::gadget::{GadgetController, UsbGadgetService};
use usb_gadgetd::state::AppState;
use usb_gadgetd::web;

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

/// usb-gadgetd command line arguments
#[derive(Parser, Debug)]
#[command(name = "usb-gadgetd")]
#[command(version, about = "USB gadget function controller", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// UDC name (overrides database config)
    #[arg(short = 'u', long, value_name = "UDC")]
    udc: Option<String>,

    /// Data directory path (default: /etc/usb-gadgetd)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Runtime worker threads
    #[arg(short = 'w', long, value_name = "N", default_value_t = 2)]
    workers: usize,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.workers.max(1))
        .thread_name("usb-gadgetd-worker")
        .enable_all()
        .build()?;

    runtime.block_on(run(args))
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    tracing::info!("Starting usb-gadgetd v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("usb-gadgetd.db")).await?;
    let config = config_store.get();

    let mut gadget_config = config.gadget.clone();
    if let Some(udc) = args.udc {
        gadget_config.udc_name = udc;
    }

    let events = Arc::new(EventBus::new());

    let controller =
        match GadgetController::new(&gadget_config, config_store.clone(), events.clone()) {
            Ok(controller) => Arc::new(controller),
            Err(e) => {
                tracing::error!("configfs setup not done yet: {}", e);
                std::process::exit(1);
            }
        };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(
        config_store,
        UsbGadgetService::new(controller.clone()),
        events,
        shutdown_tx.clone(),
    );

    let app = web::create_router(state.clone());

    let address = args
        .address
        .unwrap_or_else(|| config.web.bind_address.clone());
    let port = args.http_port.unwrap_or(config.web.http_port);
    let addr: SocketAddr = format!("{}:{}", address, port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    controller.shutdown().await;
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
        LogLevel::Error => "usb_gadgetd=error,tower_http=error",
        LogLevel::Warn => "usb_gadgetd=warn,tower_http=warn",
        LogLevel::Info => "usb_gadgetd=info,tower_http=info",
        LogLevel::Verbose => "usb_gadgetd=debug,tower_http=info",
        LogLevel::Debug => "usb_gadgetd=debug,tower_http=debug",
        LogLevel::Trace => "usb_gadgetd=trace,tower_http=debug",
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
    if let Ok(path) = std::env::var("USB_GADGETD_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/usb-gadgetd")
}
