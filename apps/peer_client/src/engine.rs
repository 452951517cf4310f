//! In-process engine used by the console client.
//!
//! Signaling and media are simulated: logins succeed after a short delay,
//! the configured demo peers are announced, and calls produce placeholder
//! tracks.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use session_core::{PeerEngine, StayAwake};
use shared::{
    domain::{
        CaptureFormat, DeviceId, DeviceKind, IceServer, MediaDevice, MediaTrack, Peer, PeerId,
        ServerEndpoint, TrackId, TrackKind, TrackOrigin,
    },
    protocol::EngineEvent,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

pub struct SimulatedEngine {
    events: broadcast::Sender<EngineEvent>,
    peers: Vec<Peer>,
    devices: Mutex<BTreeMap<DeviceKind, Vec<MediaDevice>>>,
    active_peer: Mutex<Option<PeerId>>,
    signaling_delay: Duration,
}

impl SimulatedEngine {
    pub fn new(peer_names: &[String], signaling_delay: Duration) -> Self {
        let peers = peer_names
            .iter()
            .enumerate()
            .map(|(index, name)| Peer::new(format!("peer-{}", index + 1), name.clone()))
            .collect();

        let mut devices = BTreeMap::new();
        devices.insert(
            DeviceKind::VideoCapture,
            vec![
                MediaDevice::new("cam-front", "Front camera"),
                MediaDevice::new("cam-usb", "USB camera"),
            ],
        );
        devices.insert(
            DeviceKind::AudioCapture,
            vec![MediaDevice::new("mic-default", "Default microphone")],
        );
        devices.insert(
            DeviceKind::AudioPlayout,
            vec![
                MediaDevice::new("spk-default", "Speakers"),
                MediaDevice::new("spk-headset", "Headset"),
            ],
        );

        Self {
            events: broadcast::channel(EVENT_CAPACITY).0,
            peers,
            devices: Mutex::new(devices),
            active_peer: Mutex::new(None),
            signaling_delay,
        }
    }

    /// Removes a device and announces the change, as a hot-unplug would.
    pub async fn unplug(&self, kind: DeviceKind, device_id: &DeviceId) -> Result<()> {
        let mut devices = self.devices.lock().await;
        let list = devices.entry(kind).or_default();
        let before = list.len();
        list.retain(|device| &device.id != device_id);
        if list.len() == before {
            bail!("no {kind} device with id {device_id}");
        }
        drop(devices);

        info!(%kind, device_id = %device_id, "simulated device unplugged");
        self.emit(EngineEvent::MediaDevicesChanged { kind });
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        debug!(event = event.name(), "engine emit");
        let _ = self.events.send(event);
    }

    /// Emits `events` in order after the signaling delay.
    fn emit_later(&self, events: Vec<EngineEvent>) {
        let sender = self.events.clone();
        let delay = self.signaling_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for event in events {
                let _ = sender.send(event);
            }
        });
    }
}

fn track(id: &str, kind: TrackKind, origin: TrackOrigin) -> MediaTrack {
    MediaTrack {
        id: TrackId::new(id),
        kind,
        origin,
    }
}

#[async_trait]
impl PeerEngine for SimulatedEngine {
    async fn configure_ice_servers(&self, servers: Vec<IceServer>) -> Result<()> {
        for server in &servers {
            debug!(urls = ?server.urls, "ice server");
        }
        Ok(())
    }

    async fn start_login(&self, endpoint: &ServerEndpoint) -> Result<()> {
        info!(endpoint = %endpoint, "simulated login");
        if endpoint.port == 0 {
            self.emit_later(vec![EngineEvent::ServerConnectionFailure {
                reason: format!("connection to {endpoint} refused"),
            }]);
            return Ok(());
        }

        let mut events = vec![EngineEvent::SignedIn];
        events.extend(self.peers.iter().cloned().map(EngineEvent::PeerConnected));
        events.push(EngineEvent::ReadyToConnect);
        self.emit_later(events);
        Ok(())
    }

    async fn connect_to_peer(&self, peer_id: &PeerId) -> Result<()> {
        if !self.peers.iter().any(|peer| &peer.id == peer_id) {
            return Err(anyhow!("peer {peer_id} is not signed in"));
        }
        *self.active_peer.lock().await = Some(peer_id.clone());

        self.emit_later(vec![
            EngineEvent::PeerConnectionCreated,
            EngineEvent::TrackAdded(track("local-video", TrackKind::Video, TrackOrigin::Local)),
            EngineEvent::TrackAdded(track("local-audio", TrackKind::Audio, TrackOrigin::Local)),
            EngineEvent::TrackAdded(track("remote-video", TrackKind::Video, TrackOrigin::Remote)),
            EngineEvent::TrackAdded(track("remote-audio", TrackKind::Audio, TrackOrigin::Remote)),
        ]);
        Ok(())
    }

    async fn disconnect_from_peer(&self) -> Result<()> {
        if self.active_peer.lock().await.take().is_none() {
            bail!("no active peer connection");
        }
        self.emit(EngineEvent::PeerConnectionClosed);
        self.emit(EngineEvent::ReadyToConnect);
        Ok(())
    }

    async fn disconnect_from_server(&self) -> Result<()> {
        if self.active_peer.lock().await.take().is_some() {
            self.emit(EngineEvent::PeerConnectionClosed);
        }
        self.emit(EngineEvent::Disconnected);
        Ok(())
    }

    async fn cancel_connecting_to_peer(&self) -> Result<()> {
        Ok(())
    }

    async fn enumerate_devices(&self, kind: DeviceKind) -> Result<Vec<MediaDevice>> {
        Ok(self
            .devices
            .lock()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn select_device(&self, kind: DeviceKind, device: &MediaDevice) -> Result<()> {
        let devices = self.devices.lock().await;
        let known = devices
            .get(&kind)
            .is_some_and(|list| list.iter().any(|d| d.id == device.id));
        if !known {
            bail!("{kind} device {} is gone", device.id);
        }
        debug!(%kind, device_id = %device.id, "device selected");
        Ok(())
    }

    async fn capture_formats(&self, device: &MediaDevice) -> Result<Vec<CaptureFormat>> {
        let mut formats = vec![
            CaptureFormat {
                width: 640,
                height: 480,
                frame_rate: 30,
            },
            CaptureFormat {
                width: 1280,
                height: 720,
                frame_rate: 30,
            },
        ];
        if device.id.as_str() == "cam-usb" {
            formats.push(CaptureFormat {
                width: 1920,
                height: 1080,
                frame_rate: 30,
            });
        }
        Ok(formats)
    }

    async fn select_capture_format(&self, format: CaptureFormat) -> Result<()> {
        debug!(%format, "capture format selected");
        Ok(())
    }

    async fn enable_local_video_stream(&self) -> Result<()> {
        debug!("local video enabled");
        Ok(())
    }

    async fn unmute_microphone(&self) -> Result<()> {
        debug!("microphone unmuted");
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Stand-in for a platform screen lock; only logs.
pub struct LoggingStayAwake;

impl StayAwake for LoggingStayAwake {
    fn acquire(&self) -> Result<()> {
        info!("keeping display awake");
        Ok(())
    }

    fn release(&self) -> Result<()> {
        info!("display may sleep again");
        Ok(())
    }
}
