//! Handler interface for engine lifecycle events.

use shared::{
    domain::{DeviceKind, MediaTrack, Peer, PeerId, TrackId},
    protocol::EngineEvent,
};

/// One callback per engine event. Every method defaults to a no-op so a
/// handler only implements what it cares about.
pub trait EngineEventHandler {
    fn on_peer_connected(&mut self, _peer: Peer) {}

    fn on_peer_disconnected(&mut self, _peer_id: PeerId) {}

    fn on_signed_in(&mut self) {}

    fn on_server_connection_failure(&mut self, _reason: String) {}

    fn on_disconnected(&mut self) {}

    fn on_peer_connection_created(&mut self) {}

    fn on_peer_connection_closed(&mut self) {}

    fn on_ready_to_connect(&mut self) {}

    fn on_media_devices_changed(&mut self, _kind: DeviceKind) {}

    fn on_track_added(&mut self, _track: MediaTrack) {}

    fn on_track_removed(&mut self, _track_id: TrackId) {}
}

pub fn dispatch_engine_event<H>(handler: &mut H, event: EngineEvent)
where
    H: EngineEventHandler + ?Sized,
{
    match event {
        EngineEvent::PeerConnected(peer) => handler.on_peer_connected(peer),
        EngineEvent::PeerDisconnected { peer_id } => handler.on_peer_disconnected(peer_id),
        EngineEvent::SignedIn => handler.on_signed_in(),
        EngineEvent::ServerConnectionFailure { reason } => {
            handler.on_server_connection_failure(reason)
        }
        EngineEvent::Disconnected => handler.on_disconnected(),
        EngineEvent::PeerConnectionCreated => handler.on_peer_connection_created(),
        EngineEvent::PeerConnectionClosed => handler.on_peer_connection_closed(),
        EngineEvent::ReadyToConnect => handler.on_ready_to_connect(),
        EngineEvent::MediaDevicesChanged { kind } => handler.on_media_devices_changed(kind),
        EngineEvent::TrackAdded(track) => handler.on_track_added(track),
        EngineEvent::TrackRemoved { track_id } => handler.on_track_removed(track_id),
    }
}
