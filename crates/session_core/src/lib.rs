use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{CaptureFormat, DeviceKind, IceServer, MediaDevice, PeerId, ServerEndpoint},
    protocol::EngineEvent,
};
use tokio::sync::broadcast;

pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod events;
pub mod settings;
pub mod state;

pub use controller::{SessionCommand, SessionController, SessionHandle};
pub use error::{ConfigError, SessionError, SettingsError};
pub use events::{dispatch_engine_event, EngineEventHandler};
pub use state::{SessionSnapshot, SessionState};

/// The media/signaling engine the controller drives.
///
/// Calls return once the engine has accepted (or, for the disconnect calls,
/// completed) the request. Lifecycle progress is reported through
/// [`PeerEngine::subscribe_events`].
#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn configure_ice_servers(&self, servers: Vec<IceServer>) -> Result<()>;
    async fn start_login(&self, endpoint: &ServerEndpoint) -> Result<()>;
    async fn connect_to_peer(&self, peer_id: &PeerId) -> Result<()>;
    async fn disconnect_from_peer(&self) -> Result<()>;
    async fn disconnect_from_server(&self) -> Result<()>;
    async fn cancel_connecting_to_peer(&self) -> Result<()>;
    async fn enumerate_devices(&self, kind: DeviceKind) -> Result<Vec<MediaDevice>>;
    async fn select_device(&self, kind: DeviceKind, device: &MediaDevice) -> Result<()>;
    async fn capture_formats(&self, device: &MediaDevice) -> Result<Vec<CaptureFormat>>;
    async fn select_capture_format(&self, format: CaptureFormat) -> Result<()>;
    async fn enable_local_video_stream(&self) -> Result<()>;
    async fn unmute_microphone(&self) -> Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Display/power lock held while a peer session is active.
pub trait StayAwake: Send + Sync {
    fn acquire(&self) -> Result<()>;
    fn release(&self) -> Result<()>;
}

pub struct NoopStayAwake;

impl StayAwake for NoopStayAwake {
    fn acquire(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Engine stand-in for hosts without a media stack. Every call fails.
pub struct MissingPeerEngine {
    events: broadcast::Sender<EngineEvent>,
}

impl Default for MissingPeerEngine {
    fn default() -> Self {
        Self {
            events: broadcast::channel(1).0,
        }
    }
}

#[async_trait]
impl PeerEngine for MissingPeerEngine {
    async fn configure_ice_servers(&self, _servers: Vec<IceServer>) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn start_login(&self, _endpoint: &ServerEndpoint) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn connect_to_peer(&self, _peer_id: &PeerId) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn disconnect_from_peer(&self) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn disconnect_from_server(&self) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn cancel_connecting_to_peer(&self) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn enumerate_devices(&self, _kind: DeviceKind) -> Result<Vec<MediaDevice>> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn select_device(&self, _kind: DeviceKind, _device: &MediaDevice) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn capture_formats(&self, _device: &MediaDevice) -> Result<Vec<CaptureFormat>> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn select_capture_format(&self, _format: CaptureFormat) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn enable_local_video_stream(&self) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    async fn unmute_microphone(&self) -> Result<()> {
        Err(anyhow!("peer engine is unavailable"))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
