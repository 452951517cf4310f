use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use session_core::{
    config::load_config,
    settings::{MemorySettingsStore, SettingsStore, TomlSettingsStore},
    SessionController,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod console;
mod engine;

use console::{OutputMode, ServerDefaults};
use engine::{LoggingStayAwake, SimulatedEngine};

#[derive(Parser, Debug)]
#[command(about = "Console client for the peer session demo")]
struct Args {
    /// TOML config file; `peer_client.toml` in the working directory is used when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Server address offered by `connect` without arguments.
    #[arg(long)]
    server: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Names of the simulated peers announced after sign-in.
    #[arg(long, value_delimiter = ',', default_value = "alice,bob")]
    peers: Vec<String>,
    #[arg(long, default_value_t = 150)]
    signaling_delay_ms: u64,
    /// Print snapshots and notices as JSON lines.
    #[arg(long)]
    json: bool,
    /// Keep settings in memory instead of the settings file.
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("failed to load configuration")?;
    let settings_store: Arc<dyn SettingsStore> = if args.no_persist {
        Arc::new(MemorySettingsStore::default())
    } else {
        Arc::new(TomlSettingsStore::new(&config.settings_path))
    };

    let engine = Arc::new(SimulatedEngine::new(
        &args.peers,
        Duration::from_millis(args.signaling_delay_ms),
    ));
    let mut controller = SessionController::new(
        engine.clone(),
        Arc::new(LoggingStayAwake),
        settings_store,
        config.notice_capacity,
    );
    controller.start(config.ice_servers.clone()).await;

    // Command line, then the last endpoint used, then the config file.
    let remembered = controller.settings();
    let defaults = ServerDefaults {
        address: args
            .server
            .or_else(|| remembered.server_address.clone())
            .unwrap_or_else(|| config.server.address.clone()),
        port: args
            .port
            .or(remembered.server_port)
            .unwrap_or(config.server.port)
            .to_string(),
    };
    info!(address = %defaults.address, port = %defaults.port, "peer client ready; type `help` for commands");

    let (handle, controller_task) = controller.spawn(config.command_capacity);
    let output = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    console::run(handle, engine, defaults, output).await?;

    controller_task
        .await
        .context("session controller task failed")?;
    Ok(())
}
