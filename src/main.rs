//! localwave - LAN chat broker with offline reconciliation.
//!
//! Routes chat, typing and delivery events between WebSocket clients on the
//! local network, keeps every message in a local `SQLite` store and pushes
//! unsynced messages to a cloud sink whenever the internet is reachable.
//! Also discovers devices on the LAN.
//!
//!   localwave serve                  # broker + background sync on :5000
//!   localwave scan --mode real       # one discovery pass
//!   localwave sync                   # push pending messages now
//!   localwave pending                # count of unsynced messages

mod api;
mod application;
mod cli;
mod domain;
mod infrastructure;

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use application::{
    format_devices_table, format_json, format_messages_table, format_pending,
    format_sync_outcome, format_sync_status, DeviceDiscoveryAggregator, OutputFormat, Services,
    SyncTrigger,
};
use cli::{Cli, Commands, ConfigAction};
use domain::{AppConfig, AppError, MessageStore};
use infrastructure::{
    config_file_path, default_probes, load_config, render_config, write_default_config,
    LocalStorage,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The broker is a long-running service; default it to info.
    let default_level = u8::from(matches!(cli.command, Commands::Serve { .. }));
    setup_logging(cli.verbose.max(default_level));

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli
        .output_format()
        .map_err(|message| AppError::Config { message })?;
    let mut config = load_config()?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            cmd_serve(config).await?;
        }
        Commands::Scan { mode } => {
            if let Some(mode) = mode {
                config.discovery.mode = mode;
            }
            cmd_scan(&config, format).await?;
        }
        Commands::Sync => cmd_sync(&config, format).await?,
        Commands::Pull => cmd_pull(&config, format).await?,
        Commands::Pending => cmd_pending(&config, format)?,
        Commands::Messages { last } => cmd_messages(&config, last, format)?,
        Commands::Config { action } => cmd_config(&config, action)?,
    }

    Ok(())
}

/// Run the broker until ctrl-c.
async fn cmd_serve(config: AppConfig) -> anyhow::Result<()> {
    let services = Services::from_config(&config).context("Failed to initialize services")?;
    tracing::info!(
        data_dir = %config.data_dir().display(),
        mode = ?config.discovery.mode,
        "Services initialized"
    );

    let has_endpoint = config.cloud.endpoint.is_some();
    if config.sync.enabled && !has_endpoint {
        tracing::info!("Background sync disabled until [cloud] endpoint is set");
    }
    let sync_task = (config.sync.enabled && has_endpoint).then(|| {
        tracing::info!(interval_secs = config.sync.interval_secs, "Background sync enabled");
        services.scheduler.spawn_periodic(config.sync.interval())
    });

    let addr = config.server.bind.as_str();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr, "Server listening");

    let app = api::router(services).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(task) = sync_task {
        task.abort();
    }
    tracing::info!("localwave shutting down");
    Ok(())
}

/// Wait for a ctrl-c signal for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received ctrl-c, initiating graceful shutdown");
}

/// One discovery pass.
async fn cmd_scan(config: &AppConfig, format: OutputFormat) -> domain::Result<()> {
    let aggregator =
        DeviceDiscoveryAggregator::new(default_probes(&config.discovery), &config.discovery);
    let devices = aggregator.scan().await;

    match format {
        OutputFormat::Table => {
            println!("{}", format_devices_table(&devices));
            println!();
            println!("Found {} device(s)", devices.len().to_string().cyan());
        }
        OutputFormat::Json => {
            println!("{}", format_json(&devices).map_err(AppError::json_parse)?);
        }
    }
    Ok(())
}

/// Without an endpoint there is no remote to sync with.
fn require_endpoint(config: &AppConfig) -> domain::Result<()> {
    if config.cloud.endpoint.is_none() {
        return Err(AppError::Config {
            message: "No cloud endpoint configured. Set [cloud] endpoint in config.toml".into(),
        });
    }
    Ok(())
}

/// Push pending messages now.
async fn cmd_sync(config: &AppConfig, format: OutputFormat) -> domain::Result<()> {
    require_endpoint(config)?;
    let services = Services::from_config(config)?;
    let outcome = services
        .scheduler
        .sync_to_cloud(SyncTrigger::Manual)
        .await?;

    match format {
        OutputFormat::Table => {
            println!("{}", format_sync_outcome(&outcome));
            println!();
            println!("{}", format_sync_status(&services.scheduler.status().await));
        }
        OutputFormat::Json => {
            println!("{}", format_json(&outcome).map_err(AppError::json_parse)?);
        }
    }
    Ok(())
}

/// Fetch the remote message set.
async fn cmd_pull(config: &AppConfig, format: OutputFormat) -> domain::Result<()> {
    require_endpoint(config)?;
    let services = Services::from_config(config)?;
    let messages = services.scheduler.fetch_from_cloud().await?;

    match format {
        OutputFormat::Table => {
            println!("{}", format_messages_table(&messages));
            println!();
            println!("{} message(s) in the cloud", messages.len().to_string().cyan());
        }
        OutputFormat::Json => {
            println!("{}", format_json(&messages).map_err(AppError::json_parse)?);
        }
    }
    Ok(())
}

fn open_store(config: &AppConfig) -> domain::Result<LocalStorage> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| AppError::io(format!("Failed to create {}", data_dir.display()), e))?;
    LocalStorage::open(&config.storage_db_path())
}

/// Count of unsynced messages.
fn cmd_pending(config: &AppConfig, format: OutputFormat) -> domain::Result<()> {
    let count = open_store(config)?.count_unsynced()?;

    match format {
        OutputFormat::Table => println!("{}", format_pending(count)),
        OutputFormat::Json => {
            println!(
                "{}",
                format_json(&json!({ "count": count })).map_err(AppError::json_parse)?
            );
        }
    }
    Ok(())
}

/// Locally stored messages, oldest first.
fn cmd_messages(config: &AppConfig, last: Option<usize>, format: OutputFormat) -> domain::Result<()> {
    let mut messages = open_store(config)?.list_all()?;
    if let Some(n) = last {
        let skip = messages.len().saturating_sub(n);
        messages.drain(..skip);
    }

    match format {
        OutputFormat::Table => println!("{}", format_messages_table(&messages)),
        OutputFormat::Json => {
            println!("{}", format_json(&messages).map_err(AppError::json_parse)?);
        }
    }
    Ok(())
}

/// Configuration file commands.
fn cmd_config(config: &AppConfig, action: ConfigAction) -> domain::Result<()> {
    let path = config_file_path();

    match action {
        ConfigAction::Init => {
            if write_default_config(&path)? {
                println!("{} Created {}", "✓".green().bold(), path.display());
            } else {
                println!("Config already exists at {}", path.display());
            }
        }
        ConfigAction::Show => println!("{}", render_config(config)?),
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
