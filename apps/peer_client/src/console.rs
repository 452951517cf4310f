//! Line-oriented front end: parses stdin commands into session requests and
//! prints snapshot changes and notices.

use std::{fmt::Write as _, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use session_core::{SessionHandle, SessionSnapshot};
use shared::{
    domain::{CaptureFormat, DeviceId, DeviceKind, PeerId},
    error::Notice,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, watch},
};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::warn;

use crate::engine::SimulatedEngine;

#[derive(Parser, Debug)]
#[command(name = "peer_client", no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Sign in to the signaling server; defaults to the last used endpoint.
    Connect {
        address: Option<String>,
        port: Option<String>,
    },
    /// List peers announced by the server.
    Peers,
    /// Select a peer, or clear the selection when no id is given.
    Select { peer_id: Option<String> },
    /// Call a peer, or the selected one when no id is given.
    Call { peer_id: Option<String> },
    /// Hang up the current call.
    Hangup,
    /// Sign out of the signaling server.
    Disconnect,
    /// List devices and the active capture format.
    Devices,
    /// Switch the device used for a kind (video, mic, speaker).
    Use { kind: DeviceKind, device_id: String },
    /// Pick a camera format, e.g. 1280x720@30.
    Format { format: CaptureFormat },
    /// Enumerate devices of a kind again.
    Refresh { kind: DeviceKind },
    /// Simulate a device being unplugged.
    Unplug { kind: DeviceKind, device_id: String },
    /// Tear the session down as if the app were backgrounded.
    Suspend,
    /// Show the session state.
    Status,
    /// Exit.
    Quit,
}

/// Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(words).map(|parsed| Some(parsed.command))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerDefaults {
    pub address: String,
    pub port: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run(
    handle: SessionHandle,
    engine: Arc<SimulatedEngine>,
    defaults: ServerDefaults,
    output: OutputMode,
) -> Result<()> {
    let printer = tokio::spawn(print_updates(
        handle.watch(),
        handle.subscribe_notices(),
        output,
    ));

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    while let Some(line) = lines.next().await {
        let line = line.context("failed to read from stdin")?;
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if execute(&handle, &engine, &defaults, command).await? == Flow::Quit {
            break;
        }
    }

    if handle.shutdown().await.is_err() {
        warn!("session controller already stopped");
    }
    printer.abort();
    Ok(())
}

async fn execute(
    handle: &SessionHandle,
    engine: &SimulatedEngine,
    defaults: &ServerDefaults,
    command: ConsoleCommand,
) -> Result<Flow> {
    match command {
        ConsoleCommand::Connect { address, port } => {
            let address = address.unwrap_or_else(|| defaults.address.clone());
            let port = port.unwrap_or_else(|| defaults.port.clone());
            handle.connect(address, port).await?;
        }
        ConsoleCommand::Peers => print!("{}", render_peers(&handle.snapshot())),
        ConsoleCommand::Select { peer_id } => {
            handle.select_peer(peer_id.map(PeerId::from)).await?;
        }
        ConsoleCommand::Call { peer_id: Some(id) } => {
            handle.connect_to_peer(PeerId::from(id)).await?;
        }
        ConsoleCommand::Call { peer_id: None } => handle.connect_to_selected_peer().await?,
        ConsoleCommand::Hangup => handle.disconnect_from_peer().await?,
        ConsoleCommand::Disconnect => handle.disconnect_from_server().await?,
        ConsoleCommand::Devices => print!("{}", render_devices(&handle.snapshot())),
        ConsoleCommand::Use { kind, device_id } => {
            handle.select_device(kind, DeviceId::new(device_id)).await?;
        }
        ConsoleCommand::Format { format } => handle.select_capture_format(format).await?,
        ConsoleCommand::Refresh { kind } => handle.refresh_devices(kind).await?,
        ConsoleCommand::Unplug { kind, device_id } => {
            if let Err(err) = engine.unplug(kind, &DeviceId::new(device_id)).await {
                println!("{err}");
            }
        }
        ConsoleCommand::Suspend => {
            handle.suspend().await?;
            println!("session suspended");
        }
        ConsoleCommand::Status => print!("{}", render_status(&handle.snapshot())),
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

async fn print_updates(
    mut snapshots: watch::Receiver<SessionSnapshot>,
    mut notices: broadcast::Receiver<Notice>,
    output: OutputMode,
) {
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                match output {
                    OutputMode::Text => print!("{}", render_status(&snapshot)),
                    OutputMode::Json => match serde_json::to_string(&snapshot) {
                        Ok(json) => println!("{json}"),
                        Err(err) => warn!("failed to encode snapshot: {err}"),
                    },
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => match output {
                    OutputMode::Text => println!("! {}", notice.message),
                    OutputMode::Json => match serde_json::to_string(&notice) {
                        Ok(json) => println!("{json}"),
                        Err(err) => warn!("failed to encode notice: {err}"),
                    },
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dropped notices");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let server = if snapshot.is_disconnecting() {
        "disconnecting"
    } else if snapshot.is_connected() {
        "connected"
    } else if snapshot.is_connecting() {
        "connecting"
    } else {
        "offline"
    };
    let peer = if snapshot.is_connected_to_peer() {
        "in call"
    } else if snapshot.is_connecting_to_peer() {
        "calling"
    } else {
        "idle"
    };
    let selected = snapshot
        .selected_peer()
        .map(PeerId::to_string)
        .unwrap_or_else(|| "-".into());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "server: {server} | peer: {peer} | selected: {selected} | peers: {} | tracks: {}",
        snapshot.peers().len(),
        snapshot.media_tracks().len()
    );
    let _ = writeln!(
        out,
        "  connect={} call={} hangup={} disconnect={}",
        snapshot.can_start_connect(),
        snapshot.can_connect_to_selected_peer(),
        snapshot.can_disconnect_from_peer(),
        snapshot.can_disconnect_from_server()
    );
    out
}

pub fn render_peers(snapshot: &SessionSnapshot) -> String {
    if snapshot.peers().is_empty() {
        return "no peers\n".into();
    }
    let mut out = String::new();
    for peer in snapshot.peers() {
        let marker = if snapshot.selected_peer() == Some(&peer.id) {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(out, "{marker} {} {}", peer.id, peer.name);
    }
    out
}

pub fn render_devices(snapshot: &SessionSnapshot) -> String {
    let catalog = &snapshot.devices;
    let mut out = String::new();
    for kind in DeviceKind::ALL {
        let _ = writeln!(out, "{kind}:");
        let selected = catalog.selected(kind).map(|device| &device.id);
        for device in catalog.devices(kind) {
            let marker = if selected == Some(&device.id) { '*' } else { ' ' };
            let _ = writeln!(out, "  {marker} {} {}", device.id, device.name);
        }
    }
    match catalog.selected_format() {
        Some(format) => {
            let _ = writeln!(out, "format: {format}");
        }
        None => out.push_str("format: -\n"),
    }
    out
}
