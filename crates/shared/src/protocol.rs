use serde::{Deserialize, Serialize};

use crate::domain::{DeviceKind, MediaTrack, Peer, PeerId, TrackId};

/// Lifecycle events raised by the media/signaling engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    PeerConnected(Peer),
    PeerDisconnected {
        peer_id: PeerId,
    },
    SignedIn,
    ServerConnectionFailure {
        reason: String,
    },
    Disconnected,
    PeerConnectionCreated,
    PeerConnectionClosed,
    ReadyToConnect,
    MediaDevicesChanged {
        kind: DeviceKind,
    },
    TrackAdded(MediaTrack),
    TrackRemoved {
        track_id: TrackId,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::PeerConnected(_) => "peer_connected",
            EngineEvent::PeerDisconnected { .. } => "peer_disconnected",
            EngineEvent::SignedIn => "signed_in",
            EngineEvent::ServerConnectionFailure { .. } => "server_connection_failure",
            EngineEvent::Disconnected => "disconnected",
            EngineEvent::PeerConnectionCreated => "peer_connection_created",
            EngineEvent::PeerConnectionClosed => "peer_connection_closed",
            EngineEvent::ReadyToConnect => "ready_to_connect",
            EngineEvent::MediaDevicesChanged { .. } => "media_devices_changed",
            EngineEvent::TrackAdded(_) => "track_added",
            EngineEvent::TrackRemoved { .. } => "track_removed",
        }
    }
}
