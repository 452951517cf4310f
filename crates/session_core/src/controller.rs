//! Session lifecycle controller.
//!
//! One task owns [`SessionState`]. UI commands, engine events and the
//! completions of dispatched engine calls all arrive as messages on that task,
//! so no two state transitions ever interleave.

use std::{future::Future, sync::Arc};

use anyhow::Result;
use shared::{
    domain::{
        CaptureFormat, DeviceId, DeviceKind, IceServer, MediaDevice, MediaTrack, Peer, PeerId,
        ServerEndpoint, TrackId,
    },
    error::{Notice, NoticeCode},
    protocol::EngineEvent,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, oneshot, watch,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    devices::{DeviceCatalog, SelectionChange},
    error::SessionError,
    events::{dispatch_engine_event, EngineEventHandler},
    settings::{PersistedSettings, SettingsStore},
    state::{SessionSnapshot, SessionState},
    PeerEngine, StayAwake,
};

/// Requests from the UI side, applied in order on the controller task.
#[derive(Debug)]
pub enum SessionCommand {
    Connect {
        address: String,
        port: String,
    },
    ConnectToPeer {
        peer_id: PeerId,
    },
    ConnectToSelectedPeer,
    DisconnectFromPeer,
    DisconnectFromServer,
    SelectPeer {
        peer_id: Option<PeerId>,
    },
    SelectDevice {
        kind: DeviceKind,
        device_id: DeviceId,
    },
    SelectCaptureFormat {
        format: CaptureFormat,
    },
    RefreshDevices {
        kind: DeviceKind,
    },
    Suspend {
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Connect { .. } => "connect",
            SessionCommand::ConnectToPeer { .. } => "connect_to_peer",
            SessionCommand::ConnectToSelectedPeer => "connect_to_selected_peer",
            SessionCommand::DisconnectFromPeer => "disconnect_from_peer",
            SessionCommand::DisconnectFromServer => "disconnect_from_server",
            SessionCommand::SelectPeer { .. } => "select_peer",
            SessionCommand::SelectDevice { .. } => "select_device",
            SessionCommand::SelectCaptureFormat { .. } => "select_capture_format",
            SessionCommand::RefreshDevices { .. } => "refresh_devices",
            SessionCommand::Suspend { .. } => "suspend",
            SessionCommand::Shutdown => "shutdown",
        }
    }
}

/// Result of one dispatched engine call, posted back to the controller task.
///
/// Session-scoped completions carry the epoch they were issued in; anything
/// from before the last server-session reset is dropped.
enum Completion {
    Login {
        epoch: u64,
        endpoint: ServerEndpoint,
        result: Result<()>,
    },
    PeerConnect {
        epoch: u64,
        peer_id: PeerId,
        result: Result<()>,
    },
    PeerDisconnect {
        epoch: u64,
        result: Result<()>,
    },
    ServerDisconnect {
        epoch: u64,
        result: Result<()>,
    },
    LocalMedia {
        result: Result<()>,
    },
    DevicesEnumerated {
        kind: DeviceKind,
        result: Result<Vec<MediaDevice>>,
    },
    DeviceSelected {
        kind: DeviceKind,
        device: MediaDevice,
        result: Result<()>,
    },
    CaptureFormats {
        device: MediaDevice,
        result: Result<Vec<CaptureFormat>>,
    },
    CaptureFormatSelected {
        format: CaptureFormat,
        result: Result<()>,
    },
    /// The task running the call died before reporting back.
    Lost {
        operation: &'static str,
        reason: String,
    },
}

pub struct SessionController {
    engine: Arc<dyn PeerEngine>,
    stay_awake: Arc<dyn StayAwake>,
    settings_store: Arc<dyn SettingsStore>,
    settings: PersistedSettings,
    state: SessionState,
    devices: DeviceCatalog,
    epoch: u64,
    in_flight: usize,
    engine_events: broadcast::Receiver<EngineEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    snapshots: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl SessionController {
    /// Builds the controller and registers it for the engine's events.
    pub fn new(
        engine: Arc<dyn PeerEngine>,
        stay_awake: Arc<dyn StayAwake>,
        settings_store: Arc<dyn SettingsStore>,
        notice_capacity: usize,
    ) -> Self {
        let engine_events = engine.subscribe_events();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let (notices, _) = broadcast::channel(notice_capacity.max(1));

        Self {
            engine,
            stay_awake,
            settings_store,
            settings: PersistedSettings::default(),
            state: SessionState::default(),
            devices: DeviceCatalog::default(),
            epoch: 0,
            in_flight: 0,
            engine_events,
            completions_tx,
            completions_rx,
            snapshots,
            notices,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn devices(&self) -> &DeviceCatalog {
        &self.devices
    }

    pub fn settings(&self) -> &PersistedSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.state.clone(),
            devices: self.devices.clone(),
        }
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Loads persisted settings, forwards ICE servers and enumerates devices.
    pub async fn start(&mut self, ice_servers: Vec<IceServer>) {
        match self.settings_store.load() {
            Ok(settings) => self.settings = settings,
            Err(err) => warn!("using default settings: {err}"),
        }

        let count = ice_servers.len();
        match self.engine.configure_ice_servers(ice_servers).await {
            Ok(()) => info!(count, "configured ice servers"),
            Err(err) => warn!("failed to configure ice servers: {err:#}"),
        }

        for kind in DeviceKind::ALL {
            self.refresh_devices(kind);
        }
        self.publish();
    }

    pub fn connect(&mut self, address: &str, port: &str) {
        if !self.state.can_start_connect() {
            debug!("connect ignored: already connected or connecting");
            return;
        }
        let endpoint = match ServerEndpoint::parse(address, port) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                debug!("connect ignored: {err}");
                return;
            }
        };

        info!(address = %endpoint.address, port = endpoint.port, "connecting to signaling server");
        self.state.connecting_to_server = true;
        self.settings.server_address = Some(endpoint.address.clone());
        self.settings.server_port = Some(endpoint.port);
        self.persist_settings();

        let engine = Arc::clone(&self.engine);
        let epoch = self.epoch;
        self.spawn_engine_call("start_login", async move {
            let result = engine.start_login(&endpoint).await;
            Completion::Login {
                epoch,
                endpoint,
                result,
            }
        });
        self.publish();
    }

    pub fn connect_to_peer(&mut self, peer_id: PeerId) {
        if !self.state.can_connect_to_peer(&peer_id) {
            debug!(peer_id = %peer_id, "connect to peer ignored");
            return;
        }

        info!(peer_id = %peer_id, "connecting to peer");
        self.state.connecting_to_peer = true;

        let engine = Arc::clone(&self.engine);
        let epoch = self.epoch;
        self.spawn_engine_call("connect_to_peer", async move {
            let result = engine.connect_to_peer(&peer_id).await;
            Completion::PeerConnect {
                epoch,
                peer_id,
                result,
            }
        });
        self.publish();
    }

    pub fn disconnect_from_peer(&mut self) {
        if !self.state.can_disconnect_from_peer() {
            debug!("disconnect from peer ignored");
            return;
        }

        info!("disconnecting from peer");
        self.state.ready_to_disconnect_from_peer = false;

        let engine = Arc::clone(&self.engine);
        let epoch = self.epoch;
        self.spawn_engine_call("disconnect_from_peer", async move {
            let result = engine.disconnect_from_peer().await;
            Completion::PeerDisconnect { epoch, result }
        });
        self.publish();
    }

    pub fn disconnect_from_server(&mut self) {
        if !self.state.can_disconnect_from_server() {
            debug!("disconnect from server ignored");
            return;
        }

        info!("disconnecting from signaling server");
        self.state.disconnecting_from_server = true;

        let engine = Arc::clone(&self.engine);
        let epoch = self.epoch;
        self.spawn_engine_call("disconnect_from_server", async move {
            let result = engine.disconnect_from_server().await;
            Completion::ServerDisconnect { epoch, result }
        });
        self.publish();
    }

    pub fn select_peer(&mut self, peer_id: Option<PeerId>) {
        if !self.state.select_peer(peer_id) {
            debug!("select peer ignored: unknown peer");
        }
        self.publish();
    }

    pub fn refresh_devices(&mut self, kind: DeviceKind) {
        let engine = Arc::clone(&self.engine);
        self.spawn_engine_call("enumerate_devices", async move {
            let result = engine.enumerate_devices(kind).await;
            Completion::DevicesEnumerated { kind, result }
        });
    }

    pub fn select_device(&mut self, kind: DeviceKind, device_id: DeviceId) {
        match self.devices.select(kind, &device_id) {
            Some(device) => self.forward_device_selection(kind, device),
            None => debug!(%kind, device_id = %device_id, "select device ignored: unknown device"),
        }
        self.publish();
    }

    pub fn select_capture_format(&mut self, format: CaptureFormat) {
        if !self.devices.select_capture_format(format) {
            debug!(%format, "select capture format ignored: unsupported format");
            return;
        }

        self.settings.remember_capture_format(format);
        self.persist_settings();
        self.forward_capture_format(format);
        self.publish();
    }

    /// Ordered best-effort teardown. Each step runs even when an earlier one
    /// failed; the session is reset to its initial state afterwards.
    pub async fn on_app_suspending(&mut self) {
        info!("app suspending: tearing down session");

        if let Err(err) = self.engine.cancel_connecting_to_peer().await {
            warn!("suspend: cancel connecting to peer failed: {err:#}");
        }

        if self.state.connected_to_peer {
            if let Err(err) = self.engine.disconnect_from_peer().await {
                warn!("suspend: disconnect from peer failed: {err:#}");
            }
        }

        if self.state.connected_to_server || self.state.connecting_to_server {
            if let Err(err) = self.engine.disconnect_from_server().await {
                warn!("suspend: disconnect from server failed: {err:#}");
            }
        }

        self.reset_server_session();
        self.publish();
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        debug!(event = event.name(), "engine event");
        dispatch_engine_event(self, event);
        self.publish();
    }

    pub async fn handle_command(&mut self, command: SessionCommand) {
        debug!(command = command.name(), "session command");
        match command {
            SessionCommand::Connect { address, port } => self.connect(&address, &port),
            SessionCommand::ConnectToPeer { peer_id } => self.connect_to_peer(peer_id),
            SessionCommand::ConnectToSelectedPeer => match self.state.selected_peer.clone() {
                Some(peer_id) => self.connect_to_peer(peer_id),
                None => debug!("connect to selected peer ignored: nothing selected"),
            },
            SessionCommand::DisconnectFromPeer => self.disconnect_from_peer(),
            SessionCommand::DisconnectFromServer => self.disconnect_from_server(),
            SessionCommand::SelectPeer { peer_id } => self.select_peer(peer_id),
            SessionCommand::SelectDevice { kind, device_id } => {
                self.select_device(kind, device_id)
            }
            SessionCommand::SelectCaptureFormat { format } => self.select_capture_format(format),
            SessionCommand::RefreshDevices { kind } => self.refresh_devices(kind),
            SessionCommand::Suspend { done } => {
                self.on_app_suspending().await;
                let _ = done.send(());
            }
            SessionCommand::Shutdown => {
                debug!("shutdown outside the run loop: tearing the session down");
                self.on_app_suspending().await;
            }
        }
        self.publish();
    }

    /// Waits for every dispatched engine call to report back and applies the results.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.completions_rx.recv().await {
                Some(completion) => self.apply_completion(completion),
                None => break,
            }
        }
        self.publish();
    }

    /// Moves the controller onto its own task and returns the UI-side handle.
    pub fn spawn(self, command_capacity: usize) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(command_capacity.max(1));
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: self.snapshots.subscribe(),
            notices: self.notices.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    /// Processes commands, engine events and completions until shutdown, then
    /// tears the session down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut engine_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = self.engine_events.recv(), if engine_open => match event {
                    Ok(event) => self.handle_engine_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine event stream lagged; state may be stale");
                    }
                    Err(RecvError::Closed) => {
                        warn!("engine event stream closed");
                        engine_open = false;
                    }
                },
                Some(completion) = self.completions_rx.recv() => {
                    self.apply_completion(completion);
                    self.publish();
                }
            }
        }

        self.on_app_suspending().await;
        info!("session controller stopped");
    }

    fn apply_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match completion {
            Completion::Login {
                epoch,
                endpoint,
                result,
            } => {
                if self.is_stale(epoch, "start_login") {
                    return;
                }
                if let Err(err) = result {
                    if self.state.connecting_to_server {
                        error!(endpoint = %endpoint, "start login failed: {err:#}");
                        self.reset_server_session();
                        self.notify(
                            NoticeCode::ServerConnectionFailed,
                            format!("Could not connect to {endpoint}: {err}"),
                        );
                    }
                }
            }
            Completion::PeerConnect {
                epoch,
                peer_id,
                result,
            } => {
                if self.is_stale(epoch, "connect_to_peer") {
                    return;
                }
                self.state.connecting_to_peer = false;
                if let Err(err) = result {
                    error!(peer_id = %peer_id, "connect to peer failed: {err:#}");
                    self.notify(
                        NoticeCode::PeerConnectFailed,
                        format!("Could not connect to peer {peer_id}: {err}"),
                    );
                }
            }
            Completion::PeerDisconnect { epoch, result } => {
                if self.is_stale(epoch, "disconnect_from_peer") {
                    return;
                }
                if let Err(err) = result {
                    error!("disconnect from peer failed: {err:#}");
                    if self.state.connected_to_peer {
                        self.state.ready_to_disconnect_from_peer = true;
                    }
                    self.notify(
                        NoticeCode::PeerDisconnectFailed,
                        format!("Could not hang up: {err}"),
                    );
                }
            }
            Completion::ServerDisconnect { epoch, result } => {
                if self.is_stale(epoch, "disconnect_from_server") {
                    return;
                }
                match result {
                    Ok(()) => {
                        info!("disconnected from signaling server");
                        self.reset_server_session();
                    }
                    Err(err) => {
                        error!("disconnect from server failed: {err:#}");
                        self.state.disconnecting_from_server = false;
                        self.notify(
                            NoticeCode::ServerDisconnectFailed,
                            format!("Could not disconnect from server: {err}"),
                        );
                    }
                }
            }
            Completion::LocalMedia { result } => {
                if let Err(err) = result {
                    warn!("failed to start local media: {err:#}");
                }
            }
            Completion::DevicesEnumerated { kind, result } => match result {
                Ok(devices) => {
                    debug!(%kind, count = devices.len(), "devices enumerated");
                    match self.devices.apply_enumeration(kind, devices) {
                        SelectionChange::Selected(device) => {
                            self.forward_device_selection(kind, device)
                        }
                        SelectionChange::Cleared => info!(%kind, "no devices left to select"),
                        SelectionChange::Unchanged => {}
                    }
                }
                Err(err) => {
                    warn!(%kind, "device enumeration failed: {err:#}");
                    self.notify(
                        NoticeCode::DeviceEnumerationFailed,
                        format!("Could not list {kind} devices: {err}"),
                    );
                }
            },
            Completion::DeviceSelected {
                kind,
                device,
                result,
            } => {
                if let Err(err) = result {
                    warn!(%kind, device_id = %device.id, "device selection failed: {err:#}");
                    self.notify(
                        NoticeCode::DeviceSelectionFailed,
                        format!("Could not use {} ({kind}): {err}", device.name),
                    );
                }
            }
            Completion::CaptureFormats { device, result } => {
                let still_selected = self
                    .devices
                    .selected(DeviceKind::VideoCapture)
                    .is_some_and(|selected| selected.id == device.id);
                if !still_selected {
                    debug!(device_id = %device.id, "dropping formats of deselected camera");
                    return;
                }
                match result {
                    Ok(formats) => {
                        let chosen = self.devices.apply_capture_formats(
                            formats,
                            self.settings.preferred_resolution(),
                            self.settings.frame_rate,
                        );
                        if let Some(format) = chosen {
                            self.forward_capture_format(format);
                        }
                    }
                    Err(err) => {
                        warn!(device_id = %device.id, "capture format query failed: {err:#}");
                        self.notify(
                            NoticeCode::DeviceEnumerationFailed,
                            format!("Could not list formats of {}: {err}", device.name),
                        );
                    }
                }
            }
            Completion::CaptureFormatSelected { format, result } => {
                if let Err(err) = result {
                    warn!(%format, "capture format selection failed: {err:#}");
                }
            }
            Completion::Lost { operation, reason } => {
                error!(operation, "engine call did not complete: {reason}");
            }
        }
    }

    fn is_stale(&self, epoch: u64, operation: &'static str) -> bool {
        let stale = epoch != self.epoch;
        if stale {
            debug!(operation, "dropping completion from a previous session");
        }
        stale
    }

    /// Runs `call` on its own task. Exactly one completion is posted back per
    /// call, even when the call panics, so `in_flight` always drains.
    fn spawn_engine_call<F>(&mut self, operation: &'static str, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let completion = match tokio::spawn(call).await {
                Ok(completion) => completion,
                Err(err) => Completion::Lost {
                    operation,
                    reason: err.to_string(),
                },
            };
            let _ = completions.send(completion);
        });
    }

    fn forward_device_selection(&mut self, kind: DeviceKind, device: MediaDevice) {
        info!(%kind, device_id = %device.id, "selecting device");
        let engine = Arc::clone(&self.engine);
        let selected = device.clone();
        self.spawn_engine_call("select_device", async move {
            let result = engine.select_device(kind, &selected).await;
            Completion::DeviceSelected {
                kind,
                device: selected,
                result,
            }
        });

        if kind == DeviceKind::VideoCapture {
            let engine = Arc::clone(&self.engine);
            self.spawn_engine_call("capture_formats", async move {
                let result = engine.capture_formats(&device).await;
                Completion::CaptureFormats { device, result }
            });
        }
    }

    fn forward_capture_format(&mut self, format: CaptureFormat) {
        let engine = Arc::clone(&self.engine);
        self.spawn_engine_call("select_capture_format", async move {
            let result = engine.select_capture_format(format).await;
            Completion::CaptureFormatSelected { format, result }
        });
    }

    fn start_local_media(&mut self) {
        let engine = Arc::clone(&self.engine);
        self.spawn_engine_call("start_local_media", async move {
            let video = engine.enable_local_video_stream().await;
            let audio = engine.unmute_microphone().await;
            Completion::LocalMedia {
                result: video.and(audio),
            }
        });
    }

    fn acquire_stay_awake(&mut self) {
        if self.state.stay_awake_held {
            return;
        }
        match self.stay_awake.acquire() {
            Ok(()) => {
                self.state.stay_awake_held = true;
                debug!("stay-awake acquired");
            }
            Err(err) => warn!("failed to acquire stay-awake: {err:#}"),
        }
    }

    fn release_stay_awake(&mut self) {
        if !self.state.stay_awake_held {
            return;
        }
        self.state.stay_awake_held = false;
        match self.stay_awake.release() {
            Ok(()) => debug!("stay-awake released"),
            Err(err) => warn!("failed to release stay-awake: {err:#}"),
        }
    }

    /// Back to the initial session state. Completions issued before this point
    /// become stale.
    fn reset_server_session(&mut self) {
        self.release_stay_awake();
        self.state.clear_server_session();
        self.epoch += 1;
    }

    fn persist_settings(&self) {
        if let Err(err) = self.settings_store.save(&self.settings) {
            warn!("failed to persist settings: {err}");
        }
    }

    fn notify(&self, code: NoticeCode, message: String) {
        info!(?code, "notice: {message}");
        let _ = self.notices.send(Notice::new(code, message));
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl EngineEventHandler for SessionController {
    fn on_peer_connected(&mut self, peer: Peer) {
        if !self.state.connected_to_server && !self.state.connecting_to_server {
            debug!(peer_id = %peer.id, "peer announcement ignored: not signed in");
            return;
        }
        debug!(peer_id = %peer.id, name = %peer.name, "peer connected");
        self.state.upsert_peer(peer);
    }

    fn on_peer_disconnected(&mut self, peer_id: PeerId) {
        if self.state.remove_peer(&peer_id) {
            debug!(peer_id = %peer_id, "peer disconnected");
        }
    }

    fn on_signed_in(&mut self) {
        if !self.state.connecting_to_server {
            debug!("signed-in ignored: no login in progress");
            return;
        }
        info!("signed in to signaling server");
        self.state.connecting_to_server = false;
        self.state.connected_to_server = true;
    }

    fn on_server_connection_failure(&mut self, reason: String) {
        if self.state.connecting_to_server {
            error!("server connection failed: {reason}");
            self.reset_server_session();
            self.notify(
                NoticeCode::ServerConnectionFailed,
                format!("Failed to connect to server: {reason}"),
            );
        } else if self.state.connected_to_server {
            error!("server connection lost: {reason}");
            self.reset_server_session();
            self.notify(
                NoticeCode::ServerConnectionFailed,
                format!("Lost connection to server: {reason}"),
            );
        } else {
            debug!("server connection failure ignored: not connected");
        }
    }

    fn on_disconnected(&mut self) {
        let state = &self.state;
        if state.connected_to_server || state.connecting_to_server || state.disconnecting_from_server
        {
            info!("signaling session ended");
            self.reset_server_session();
        }
    }

    fn on_peer_connection_created(&mut self) {
        if !self.state.connected_to_server {
            warn!("peer connection created while not signed in; ignoring");
            return;
        }
        let newly_connected = !self.state.connected_to_peer;
        self.state.connecting_to_peer = false;
        self.state.ready_to_connect_to_peer = false;
        self.state.connected_to_peer = true;
        self.state.ready_to_disconnect_from_peer = true;
        self.acquire_stay_awake();

        if newly_connected {
            info!("peer connection established");
            self.start_local_media();
        }
    }

    fn on_peer_connection_closed(&mut self) {
        if self.state.connected_to_peer {
            info!("peer connection closed");
        }
        self.state.clear_peer_session();
        self.release_stay_awake();
    }

    fn on_ready_to_connect(&mut self) {
        if self.state.connected_to_server && !self.state.connected_to_peer {
            self.state.ready_to_connect_to_peer = true;
        }
    }

    fn on_media_devices_changed(&mut self, kind: DeviceKind) {
        debug!(%kind, "media devices changed");
        self.refresh_devices(kind);
    }

    fn on_track_added(&mut self, track: MediaTrack) {
        if !self.state.connected_to_peer {
            debug!(track_id = %track.id, "track ignored: no peer session");
            return;
        }
        self.state.add_track(track);
    }

    fn on_track_removed(&mut self, track_id: TrackId) {
        self.state.remove_track(&track_id);
    }
}

/// Cloneable UI-side handle: sends commands, observes snapshots and notices.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::ControllerStopped)
    }

    pub async fn connect(
        &self,
        address: impl Into<String>,
        port: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect {
            address: address.into(),
            port: port.into(),
        })
        .await
    }

    pub async fn connect_to_peer(&self, peer_id: PeerId) -> Result<(), SessionError> {
        self.send(SessionCommand::ConnectToPeer { peer_id }).await
    }

    pub async fn connect_to_selected_peer(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ConnectToSelectedPeer).await
    }

    pub async fn disconnect_from_peer(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::DisconnectFromPeer).await
    }

    pub async fn disconnect_from_server(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::DisconnectFromServer).await
    }

    pub async fn select_peer(&self, peer_id: Option<PeerId>) -> Result<(), SessionError> {
        self.send(SessionCommand::SelectPeer { peer_id }).await
    }

    pub async fn select_device(
        &self,
        kind: DeviceKind,
        device_id: DeviceId,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::SelectDevice { kind, device_id })
            .await
    }

    pub async fn select_capture_format(&self, format: CaptureFormat) -> Result<(), SessionError> {
        self.send(SessionCommand::SelectCaptureFormat { format })
            .await
    }

    pub async fn refresh_devices(&self, kind: DeviceKind) -> Result<(), SessionError> {
        self.send(SessionCommand::RefreshDevices { kind }).await
    }

    /// Runs the suspend teardown and waits until it has finished.
    pub async fn suspend(&self) -> Result<(), SessionError> {
        let (done, finished) = oneshot::channel();
        self.send(SessionCommand::Suspend { done }).await?;
        finished.await.map_err(|_| SessionError::ControllerStopped)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
