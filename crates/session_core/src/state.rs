//! Connection state owned by the session controller and the snapshot it publishes.

use serde::Serialize;
use shared::domain::{MediaTrack, Peer, PeerId, ServerEndpoint, TrackId};

use crate::devices::DeviceCatalog;

/// Flags, peers and selection for one application session.
///
/// Only the controller mutates this record. Everything else sees clones of it
/// through [`SessionSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub(crate) connected_to_server: bool,
    pub(crate) connecting_to_server: bool,
    pub(crate) disconnecting_from_server: bool,
    pub(crate) connected_to_peer: bool,
    pub(crate) connecting_to_peer: bool,
    pub(crate) ready_to_connect_to_peer: bool,
    pub(crate) ready_to_disconnect_from_peer: bool,
    pub(crate) selected_peer: Option<PeerId>,
    pub(crate) known_peers: Vec<Peer>,
    pub(crate) media_tracks: Vec<MediaTrack>,
    pub(crate) stay_awake_held: bool,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.connected_to_server
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting_to_server
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting_from_server
    }

    pub fn is_connected_to_peer(&self) -> bool {
        self.connected_to_peer
    }

    pub fn is_connecting_to_peer(&self) -> bool {
        self.connecting_to_peer
    }

    pub fn is_ready_to_connect(&self) -> bool {
        self.ready_to_connect_to_peer
    }

    pub fn is_ready_to_disconnect(&self) -> bool {
        self.ready_to_disconnect_from_peer
    }

    pub fn peers(&self) -> &[Peer] {
        &self.known_peers
    }

    pub fn selected_peer(&self) -> Option<&PeerId> {
        self.selected_peer.as_ref()
    }

    pub fn media_tracks(&self) -> &[MediaTrack] {
        &self.media_tracks
    }

    pub fn holds_stay_awake(&self) -> bool {
        self.stay_awake_held
    }

    pub fn has_peer(&self, peer_id: &PeerId) -> bool {
        self.known_peers.iter().any(|peer| &peer.id == peer_id)
    }

    /// Server-side half of the connect predicate; the endpoint is validated separately.
    pub fn can_start_connect(&self) -> bool {
        !self.connected_to_server && !self.connecting_to_server
    }

    pub fn can_connect(&self, address: &str, port: &str) -> bool {
        self.can_start_connect() && ServerEndpoint::parse(address, port).is_ok()
    }

    pub fn can_connect_to_peer(&self, peer_id: &PeerId) -> bool {
        self.has_peer(peer_id)
            && !self.connected_to_peer
            && !self.connecting_to_peer
            && self.ready_to_connect_to_peer
    }

    pub fn can_connect_to_selected_peer(&self) -> bool {
        self.selected_peer
            .as_ref()
            .is_some_and(|peer_id| self.can_connect_to_peer(peer_id))
    }

    pub fn can_disconnect_from_peer(&self) -> bool {
        self.connected_to_peer && self.ready_to_disconnect_from_peer
    }

    pub fn can_disconnect_from_server(&self) -> bool {
        self.connected_to_server && !self.disconnecting_from_server
    }

    /// Adds a peer in discovery order, or renames it in place when the id is known.
    pub(crate) fn upsert_peer(&mut self, peer: Peer) -> bool {
        match self.known_peers.iter_mut().find(|known| known.id == peer.id) {
            Some(known) if known.name == peer.name => false,
            Some(known) => {
                *known = peer;
                true
            }
            None => {
                self.known_peers.push(peer);
                true
            }
        }
    }

    pub(crate) fn remove_peer(&mut self, peer_id: &PeerId) -> bool {
        let before = self.known_peers.len();
        self.known_peers.retain(|peer| &peer.id != peer_id);
        let removed = self.known_peers.len() != before;
        if removed && self.selected_peer.as_ref() == Some(peer_id) {
            self.selected_peer = None;
        }
        removed
    }

    pub(crate) fn select_peer(&mut self, peer_id: Option<PeerId>) -> bool {
        match peer_id {
            Some(peer_id) if !self.has_peer(&peer_id) => false,
            selection => {
                self.selected_peer = selection;
                true
            }
        }
    }

    pub(crate) fn add_track(&mut self, track: MediaTrack) {
        if !self.media_tracks.iter().any(|known| known.id == track.id) {
            self.media_tracks.push(track);
        }
    }

    pub(crate) fn remove_track(&mut self, track_id: &TrackId) {
        self.media_tracks.retain(|track| &track.id != track_id);
    }

    /// Clears every peer-session flag; the stay-awake guard is left to the caller.
    pub(crate) fn clear_peer_session(&mut self) {
        self.connected_to_peer = false;
        self.connecting_to_peer = false;
        self.ready_to_disconnect_from_peer = false;
        self.media_tracks.clear();
    }

    /// Clears everything tied to the signaling server session.
    pub(crate) fn clear_server_session(&mut self) {
        self.clear_peer_session();
        self.connected_to_server = false;
        self.connecting_to_server = false;
        self.disconnecting_from_server = false;
        self.ready_to_connect_to_peer = false;
        self.selected_peer = None;
        self.known_peers.clear();
    }
}

/// What observers see after every applied message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session: SessionState,
    pub devices: DeviceCatalog,
}

impl std::ops::Deref for SessionSnapshot {
    type Target = SessionState;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}
