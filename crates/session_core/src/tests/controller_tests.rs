use super::*;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use shared::domain::{TrackKind, TrackOrigin};
use tokio::sync::Mutex;

use crate::{settings::MemorySettingsStore, MissingPeerEngine, NoopStayAwake};

#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineCall {
    ConfigureIceServers(usize),
    StartLogin(ServerEndpoint),
    ConnectToPeer(PeerId),
    DisconnectFromPeer,
    DisconnectFromPeerDone,
    DisconnectFromServer,
    DisconnectFromServerDone,
    CancelConnectingToPeer,
    EnumerateDevices(DeviceKind),
    SelectDevice(DeviceKind, DeviceId),
    CaptureFormats(DeviceId),
    SelectCaptureFormat(CaptureFormat),
    EnableLocalVideoStream,
    UnmuteMicrophone,
}

struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    events: broadcast::Sender<EngineEvent>,
    devices: Mutex<HashMap<DeviceKind, Vec<MediaDevice>>>,
    formats: Vec<CaptureFormat>,
    fail_login: bool,
    refused_port: Option<u16>,
    fail_connect_to_peer: bool,
    fail_enumeration: AtomicBool,
    fail_disconnect_from_peer: bool,
    panic_on_enumeration: bool,
    scripted_peers: Option<Vec<Peer>>,
    disconnect_delay: Duration,
}

impl MockEngine {
    fn new() -> Self {
        let devices = HashMap::from([
            (
                DeviceKind::VideoCapture,
                vec![
                    MediaDevice::new("cam-1", "Front Camera"),
                    MediaDevice::new("cam-2", "USB Camera"),
                ],
            ),
            (
                DeviceKind::AudioCapture,
                vec![MediaDevice::new("mic-1", "Built-in Microphone")],
            ),
            (
                DeviceKind::AudioPlayout,
                vec![MediaDevice::new("spk-1", "Speakers")],
            ),
        ]);

        Self {
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(64).0,
            devices: Mutex::new(devices),
            formats: vec![fmt(640, 480, 30), fmt(1280, 720, 15), fmt(1280, 720, 30)],
            fail_login: false,
            refused_port: None,
            fail_connect_to_peer: false,
            fail_enumeration: AtomicBool::new(false),
            fail_disconnect_from_peer: false,
            panic_on_enumeration: false,
            scripted_peers: None,
            disconnect_delay: Duration::ZERO,
        }
    }

    /// Raises lifecycle events the way a live engine would.
    fn scripted(peers: Vec<Peer>) -> Self {
        Self {
            scripted_peers: Some(peers),
            ..Self::new()
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.scripted_peers.is_some() {
            let _ = self.events.send(event);
        }
    }

    async fn record(&self, call: EngineCall) {
        self.calls.lock().await.push(call);
    }

    async fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl PeerEngine for MockEngine {
    async fn configure_ice_servers(&self, servers: Vec<IceServer>) -> Result<()> {
        self.record(EngineCall::ConfigureIceServers(servers.len()))
            .await;
        Ok(())
    }

    async fn start_login(&self, endpoint: &ServerEndpoint) -> Result<()> {
        self.record(EngineCall::StartLogin(endpoint.clone())).await;
        if self.fail_login || self.refused_port == Some(endpoint.port) {
            return Err(anyhow!("connection refused"));
        }
        self.emit(EngineEvent::SignedIn);
        self.emit(EngineEvent::ReadyToConnect);
        for peer in self.scripted_peers.iter().flatten() {
            self.emit(EngineEvent::PeerConnected(peer.clone()));
        }
        Ok(())
    }

    async fn connect_to_peer(&self, peer_id: &PeerId) -> Result<()> {
        self.record(EngineCall::ConnectToPeer(peer_id.clone())).await;
        if self.fail_connect_to_peer {
            return Err(anyhow!("peer is busy"));
        }
        self.emit(EngineEvent::PeerConnectionCreated);
        Ok(())
    }

    async fn disconnect_from_peer(&self) -> Result<()> {
        self.record(EngineCall::DisconnectFromPeer).await;
        tokio::time::sleep(self.disconnect_delay).await;
        self.record(EngineCall::DisconnectFromPeerDone).await;
        if self.fail_disconnect_from_peer {
            return Err(anyhow!("peer connection already torn down"));
        }
        self.emit(EngineEvent::PeerConnectionClosed);
        self.emit(EngineEvent::ReadyToConnect);
        Ok(())
    }

    async fn disconnect_from_server(&self) -> Result<()> {
        self.record(EngineCall::DisconnectFromServer).await;
        tokio::time::sleep(self.disconnect_delay).await;
        self.record(EngineCall::DisconnectFromServerDone).await;
        self.emit(EngineEvent::Disconnected);
        Ok(())
    }

    async fn cancel_connecting_to_peer(&self) -> Result<()> {
        self.record(EngineCall::CancelConnectingToPeer).await;
        Ok(())
    }

    async fn enumerate_devices(&self, kind: DeviceKind) -> Result<Vec<MediaDevice>> {
        self.record(EngineCall::EnumerateDevices(kind)).await;
        if self.panic_on_enumeration {
            panic!("device backend crashed");
        }
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(anyhow!("device watcher unavailable"));
        }
        Ok(self
            .devices
            .lock()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn select_device(&self, kind: DeviceKind, device: &MediaDevice) -> Result<()> {
        self.record(EngineCall::SelectDevice(kind, device.id.clone()))
            .await;
        Ok(())
    }

    async fn capture_formats(&self, device: &MediaDevice) -> Result<Vec<CaptureFormat>> {
        self.record(EngineCall::CaptureFormats(device.id.clone()))
            .await;
        Ok(self.formats.clone())
    }

    async fn select_capture_format(&self, format: CaptureFormat) -> Result<()> {
        self.record(EngineCall::SelectCaptureFormat(format)).await;
        Ok(())
    }

    async fn enable_local_video_stream(&self) -> Result<()> {
        self.record(EngineCall::EnableLocalVideoStream).await;
        Ok(())
    }

    async fn unmute_microphone(&self) -> Result<()> {
        self.record(EngineCall::UnmuteMicrophone).await;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
struct CountingStayAwake {
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingStayAwake {
    fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn outstanding(&self) -> usize {
        self.acquires() - self.releases()
    }
}

impl StayAwake for CountingStayAwake {
    fn acquire(&self) -> Result<()> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    engine: Arc<MockEngine>,
    stay_awake: Arc<CountingStayAwake>,
    store: Arc<MemorySettingsStore>,
    controller: SessionController,
}

fn harness(engine: MockEngine) -> Harness {
    harness_with_settings(engine, PersistedSettings::default())
}

fn harness_with_settings(engine: MockEngine, settings: PersistedSettings) -> Harness {
    let engine = Arc::new(engine);
    let stay_awake = Arc::new(CountingStayAwake::default());
    let store = Arc::new(MemorySettingsStore::new(settings));
    let controller = SessionController::new(engine.clone(), stay_awake.clone(), store.clone(), 16);
    Harness {
        engine,
        stay_awake,
        store,
        controller,
    }
}

fn fmt(width: u32, height: u32, frame_rate: u32) -> CaptureFormat {
    CaptureFormat {
        width,
        height,
        frame_rate,
    }
}

fn p1() -> PeerId {
    PeerId::from("P1")
}

fn drain_notices(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

/// Connects to the demo server and announces peer P1.
async fn sign_in(h: &mut Harness) {
    h.controller.connect("10.10.50.158", "8888");
    h.controller.settle().await;
    h.controller.handle_engine_event(EngineEvent::SignedIn);
    h.controller.handle_engine_event(EngineEvent::ReadyToConnect);
    h.controller
        .handle_engine_event(EngineEvent::PeerConnected(Peer::new("P1", "alice")));
}

async fn call_p1(h: &mut Harness) {
    h.controller.connect_to_peer(p1());
    h.controller.settle().await;
    h.controller
        .handle_engine_event(EngineEvent::PeerConnectionCreated);
    h.controller.settle().await;
}

fn assert_server_flags_exclusive(state: &SessionState) {
    assert!(
        !(state.is_connected() && state.is_connecting()),
        "connected and connecting at once: {state:?}"
    );
}

#[tokio::test]
async fn connect_call_and_hang_up_scenario() {
    let mut h = harness(MockEngine::new());

    h.controller.connect("10.10.50.158", "8888");
    assert!(h.controller.state().is_connecting());
    h.controller.settle().await;
    h.controller.handle_engine_event(EngineEvent::SignedIn);
    assert!(h.controller.state().is_connected());
    assert!(!h.controller.state().is_connecting());

    h.controller.handle_engine_event(EngineEvent::ReadyToConnect);
    h.controller
        .handle_engine_event(EngineEvent::PeerConnected(Peer::new("P1", "alice")));
    assert_eq!(h.controller.state().peers(), &[Peer::new("P1", "alice")]);

    call_p1(&mut h).await;
    let state = h.controller.state();
    assert!(state.is_connected_to_peer());
    assert!(!state.is_ready_to_connect());
    assert!(state.is_ready_to_disconnect());
    assert_eq!(h.stay_awake.acquires(), 1);

    let calls = h.engine.calls().await;
    assert!(calls.contains(&EngineCall::ConnectToPeer(p1())));
    assert!(calls.contains(&EngineCall::EnableLocalVideoStream));
    assert!(calls.contains(&EngineCall::UnmuteMicrophone));

    h.controller.disconnect_from_peer();
    h.controller.settle().await;
    h.controller
        .handle_engine_event(EngineEvent::PeerConnectionClosed);
    assert!(!h.controller.state().is_connected_to_peer());
    assert!(!h.controller.state().is_ready_to_connect());
    assert_eq!(h.stay_awake.releases(), 1);

    h.controller.handle_engine_event(EngineEvent::ReadyToConnect);
    assert!(h.controller.state().is_ready_to_connect());
    assert_eq!(h.stay_awake.acquires(), 1);
}

#[tokio::test]
async fn connect_is_ignored_while_busy_or_for_invalid_endpoints() {
    let mut h = harness(MockEngine::new());

    h.controller.connect("10.10.50.158", "65536");
    h.controller.connect("", "8888");
    h.controller.settle().await;
    assert!(!h.controller.state().is_connecting());
    assert!(h.engine.calls().await.is_empty());

    h.controller.connect("10.10.50.158", "8888");
    h.controller.connect("10.10.50.158", "8888");
    h.controller.settle().await;

    let logins = h
        .engine
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, EngineCall::StartLogin(_)))
        .count();
    assert_eq!(logins, 1);
}

#[tokio::test]
async fn connect_persists_server_endpoint() {
    let mut h = harness(MockEngine::new());
    h.controller.connect(" signaling.local ", "9000");

    let saved = h.store.load().expect("load");
    assert_eq!(saved.server_address.as_deref(), Some("signaling.local"));
    assert_eq!(saved.server_port, Some(9000));
}

#[tokio::test]
async fn server_connection_failure_reverts_and_notifies_once() {
    let mut h = harness(MockEngine::new());
    let mut notices = h.controller.subscribe_notices();

    h.controller.connect("10.10.50.158", "8888");
    h.controller.settle().await;
    h.controller
        .handle_engine_event(EngineEvent::ServerConnectionFailure {
            reason: "timed out".to_string(),
        });

    let state = h.controller.state();
    assert!(!state.is_connecting());
    assert!(!state.is_connected());

    let notices = drain_notices(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, NoticeCode::ServerConnectionFailed);
}

#[tokio::test]
async fn failed_login_dispatch_and_failure_event_notify_once() {
    let mut h = harness(MockEngine {
        fail_login: true,
        ..MockEngine::new()
    });
    let mut notices = h.controller.subscribe_notices();

    h.controller.connect("10.10.50.158", "8888");
    h.controller.settle().await;
    h.controller
        .handle_engine_event(EngineEvent::ServerConnectionFailure {
            reason: "connection refused".to_string(),
        });

    assert!(!h.controller.state().is_connecting());
    assert_eq!(drain_notices(&mut notices).len(), 1);

    // The command is available again after the failure.
    assert!(h.controller.state().can_connect("10.10.50.158", "8888"));
}

#[tokio::test]
async fn failed_login_drops_peers_announced_while_connecting() {
    let mut h = harness(MockEngine::new());
    let mut notices = h.controller.subscribe_notices();

    h.controller.connect("10.10.50.158", "8888");
    h.controller
        .handle_engine_event(EngineEvent::PeerConnected(Peer::new("P1", "alice")));
    h.controller.select_peer(Some(p1()));
    assert_eq!(h.controller.state().selected_peer(), Some(&p1()));

    h.controller
        .handle_engine_event(EngineEvent::ServerConnectionFailure {
            reason: "timed out".to_string(),
        });

    assert!(h.controller.state().peers().is_empty());
    assert_eq!(h.controller.state().selected_peer(), None);
    assert_eq!(h.controller.state(), &SessionState::default());
    assert_eq!(drain_notices(&mut notices).len(), 1);
}

#[tokio::test]
async fn rejected_login_dispatch_drops_peers_announced_while_connecting() {
    let mut h = harness(MockEngine {
        fail_login: true,
        ..MockEngine::new()
    });

    h.controller.connect("10.10.50.158", "8888");
    h.controller
        .handle_engine_event(EngineEvent::PeerConnected(Peer::new("P1", "alice")));
    h.controller.select_peer(Some(p1()));
    h.controller.settle().await;

    assert_eq!(h.controller.state(), &SessionState::default());
}

#[tokio::test]
async fn retry_survives_late_result_of_failed_first_attempt() {
    let mut h = harness(MockEngine {
        refused_port: Some(9000),
        ..MockEngine::new()
    });
    let mut notices = h.controller.subscribe_notices();

    // The first attempt's dispatch result is still pending when the failure
    // event arrives and the user retries.
    h.controller.connect("10.10.50.158", "9000");
    h.controller
        .handle_engine_event(EngineEvent::ServerConnectionFailure {
            reason: "refused".to_string(),
        });
    h.controller.connect("10.10.50.158", "8888");
    h.controller.settle().await;

    assert!(h.controller.state().is_connecting());
    assert_eq!(drain_notices(&mut notices).len(), 1);

    h.controller.handle_engine_event(EngineEvent::SignedIn);
    assert!(h.controller.state().is_connected());
    assert!(!h.controller.state().is_connecting());
}

enum Step {
    Connect(&'static str),
    Event(EngineEvent),
    Select(&'static str),
    DisconnectFromServer,
    Settle,
    Suspend,
}

#[tokio::test]
async fn offline_session_never_keeps_peers_or_selection() {
    let mut h = harness(MockEngine {
        refused_port: Some(9000),
        ..MockEngine::new()
    });
    let announce = |id: &str, name: &str| Step::Event(EngineEvent::PeerConnected(Peer::new(id, name)));
    let failure = || {
        Step::Event(EngineEvent::ServerConnectionFailure {
            reason: "link lost".to_string(),
        })
    };

    let steps = vec![
        Step::Connect("8888"),
        announce("P1", "alice"),
        Step::Select("P1"),
        failure(),
        Step::Connect("9000"),
        announce("P1", "alice"),
        Step::Select("P1"),
        Step::Settle,
        Step::Connect("8888"),
        Step::Event(EngineEvent::SignedIn),
        announce("P1", "alice"),
        announce("P2", "bob"),
        Step::Select("P2"),
        Step::Event(EngineEvent::ReadyToConnect),
        Step::DisconnectFromServer,
        Step::Settle,
        Step::Connect("8888"),
        announce("P2", "bob"),
        Step::Select("P2"),
        Step::Suspend,
        Step::Connect("8888"),
        Step::Event(EngineEvent::SignedIn),
        announce("P1", "alice"),
        Step::Select("P1"),
        failure(),
        Step::Settle,
        Step::Connect("8888"),
        Step::Settle,
        Step::Event(EngineEvent::SignedIn),
        announce("P1", "alice"),
        Step::Event(EngineEvent::Disconnected),
        announce("P1", "alice"),
        Step::Settle,
    ];

    for (index, step) in steps.into_iter().enumerate() {
        match step {
            Step::Connect(port) => h.controller.connect("10.10.50.158", port),
            Step::Event(event) => h.controller.handle_engine_event(event),
            Step::Select(id) => h.controller.select_peer(Some(PeerId::from(id))),
            Step::DisconnectFromServer => h.controller.disconnect_from_server(),
            Step::Settle => h.controller.settle().await,
            Step::Suspend => h.controller.on_app_suspending().await,
        }

        let state = h.controller.state();
        assert_server_flags_exclusive(state);
        if !state.is_connected() && !state.is_connecting() {
            assert!(
                state.peers().is_empty() && state.selected_peer().is_none(),
                "step {index} left an offline session with peers: {state:?}"
            );
        }
    }
}

#[tokio::test]
async fn server_flags_never_overlap_across_command_sequences() {
    let mut h = harness(MockEngine::new());

    for round in 0..3 {
        h.controller.connect("10.10.50.158", "8888");
        assert_server_flags_exclusive(h.controller.state());
        h.controller.connect("10.10.50.158", "8888");
        h.controller.disconnect_from_server();
        assert_server_flags_exclusive(h.controller.state());
        h.controller.settle().await;

        if round % 2 == 0 {
            h.controller.handle_engine_event(EngineEvent::SignedIn);
        } else {
            h.controller
                .handle_engine_event(EngineEvent::ServerConnectionFailure {
                    reason: "refused".to_string(),
                });
        }
        assert_server_flags_exclusive(h.controller.state());

        h.controller.handle_engine_event(EngineEvent::SignedIn);
        h.controller.connect("10.10.50.158", "8888");
        assert_server_flags_exclusive(h.controller.state());

        h.controller.disconnect_from_server();
        h.controller.disconnect_from_server();
        assert_server_flags_exclusive(h.controller.state());
        h.controller.settle().await;
        assert_server_flags_exclusive(h.controller.state());
        assert!(!h.controller.state().is_connected());
    }
}

#[tokio::test]
async fn connect_to_unknown_peer_is_a_no_op() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;

    let before = h.controller.state().clone();
    h.controller.connect_to_peer(PeerId::from("ghost"));
    h.controller.settle().await;

    assert_eq!(h.controller.state(), &before);
    assert!(!h
        .engine
        .calls()
        .await
        .iter()
        .any(|call| matches!(call, EngineCall::ConnectToPeer(_))));
}

#[tokio::test]
async fn connect_to_selected_peer_requires_a_selection() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;

    h.controller
        .handle_command(SessionCommand::ConnectToSelectedPeer)
        .await;
    h.controller.settle().await;
    assert!(h.engine.calls().await.iter().all(|call| !matches!(call, EngineCall::ConnectToPeer(_))));

    h.controller
        .handle_command(SessionCommand::SelectPeer {
            peer_id: Some(p1()),
        })
        .await;
    h.controller
        .handle_command(SessionCommand::ConnectToSelectedPeer)
        .await;
    h.controller.settle().await;
    assert!(h.engine.calls().await.contains(&EngineCall::ConnectToPeer(p1())));
}

#[tokio::test]
async fn failed_peer_connect_notifies_and_rearms_command() {
    let mut h = harness(MockEngine {
        fail_connect_to_peer: true,
        ..MockEngine::new()
    });
    sign_in(&mut h).await;
    let mut notices = h.controller.subscribe_notices();

    h.controller.connect_to_peer(p1());
    assert!(h.controller.state().is_connecting_to_peer());
    assert!(!h.controller.state().can_connect_to_peer(&p1()));
    h.controller.settle().await;

    assert!(!h.controller.state().is_connected_to_peer());
    assert!(h.controller.state().can_connect_to_peer(&p1()));
    let notices = drain_notices(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, NoticeCode::PeerConnectFailed);
    assert_eq!(h.stay_awake.acquires(), 0);
}

#[tokio::test]
async fn peer_departure_clears_selection() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;
    h.controller
        .handle_engine_event(EngineEvent::PeerConnected(Peer::new("P2", "bob")));
    h.controller.select_peer(Some(p1()));
    assert_eq!(h.controller.state().selected_peer(), Some(&p1()));

    h.controller
        .handle_engine_event(EngineEvent::PeerDisconnected { peer_id: p1() });
    assert_eq!(h.controller.state().selected_peer(), None);
    assert_eq!(h.controller.state().peers(), &[Peer::new("P2", "bob")]);

    h.controller.select_peer(Some(p1()));
    assert_eq!(h.controller.state().selected_peer(), None);
}

#[tokio::test]
async fn disconnect_from_server_clears_peers_when_it_completes() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;
    h.controller.select_peer(Some(p1()));
    call_p1(&mut h).await;

    h.controller.disconnect_from_server();
    let state = h.controller.state();
    assert!(state.is_disconnecting());
    assert!(!state.can_disconnect_from_server());
    assert_eq!(state.peers().len(), 1);

    h.controller.settle().await;
    let state = h.controller.state();
    assert!(state.peers().is_empty());
    assert_eq!(state.selected_peer(), None);
    assert!(!state.is_connected());
    assert!(!state.is_disconnecting());
    assert!(!state.is_connected_to_peer());
    assert_eq!(h.stay_awake.outstanding(), 0);
}

#[tokio::test]
async fn unsolicited_disconnect_resets_server_session() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;
    call_p1(&mut h).await;

    h.controller.handle_engine_event(EngineEvent::Disconnected);
    assert_eq!(h.controller.state(), &SessionState::default());
    assert_eq!(h.stay_awake.releases(), 1);

    // Late events from the old session do not resurrect it.
    h.controller.handle_engine_event(EngineEvent::ReadyToConnect);
    h.controller
        .handle_engine_event(EngineEvent::PeerConnected(Peer::new("P1", "alice")));
    h.controller.handle_engine_event(EngineEvent::SignedIn);
    assert_eq!(h.controller.state(), &SessionState::default());
}

#[tokio::test]
async fn stay_awake_acquire_and_release_stay_balanced() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;

    let steps = [
        EngineEvent::PeerConnectionCreated,
        EngineEvent::PeerConnectionCreated,
        EngineEvent::PeerConnectionClosed,
        EngineEvent::PeerConnectionClosed,
        EngineEvent::ReadyToConnect,
        EngineEvent::PeerConnectionCreated,
        EngineEvent::PeerConnectionClosed,
        EngineEvent::PeerConnectionCreated,
        EngineEvent::ServerConnectionFailure {
            reason: "link lost".to_string(),
        },
        EngineEvent::PeerConnectionClosed,
    ];

    for event in steps {
        h.controller.handle_engine_event(event);
        h.controller.settle().await;
        let connected = h.controller.state().is_connected_to_peer();
        assert_eq!(h.stay_awake.outstanding(), usize::from(connected));
        assert_eq!(h.controller.state().holds_stay_awake(), connected);
        assert!(!(connected && h.controller.state().is_ready_to_connect()));
    }

    assert_eq!(h.stay_awake.acquires(), 3);
    assert_eq!(h.stay_awake.releases(), 3);
}

#[tokio::test]
async fn closing_peer_connection_drops_media_tracks() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;

    h.controller.handle_engine_event(EngineEvent::TrackAdded(MediaTrack {
        id: TrackId::from("early"),
        kind: TrackKind::Video,
        origin: TrackOrigin::Remote,
    }));
    assert!(h.controller.state().media_tracks().is_empty());

    call_p1(&mut h).await;
    for (id, kind) in [("remote-video", TrackKind::Video), ("remote-audio", TrackKind::Audio)] {
        h.controller.handle_engine_event(EngineEvent::TrackAdded(MediaTrack {
            id: TrackId::from(id),
            kind,
            origin: TrackOrigin::Remote,
        }));
    }
    h.controller.handle_engine_event(EngineEvent::TrackRemoved {
        track_id: TrackId::from("remote-audio"),
    });
    assert_eq!(h.controller.state().media_tracks().len(), 1);

    h.controller
        .handle_engine_event(EngineEvent::PeerConnectionClosed);
    assert!(h.controller.state().media_tracks().is_empty());
}

#[tokio::test]
async fn suspend_disconnects_peer_before_server_and_resets() {
    let mut h = harness(MockEngine {
        disconnect_delay: Duration::from_millis(20),
        ..MockEngine::new()
    });
    sign_in(&mut h).await;
    call_p1(&mut h).await;
    let mut notices = h.controller.subscribe_notices();

    h.controller.on_app_suspending().await;

    let teardown: Vec<_> = h
        .engine
        .calls()
        .await
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                EngineCall::CancelConnectingToPeer
                    | EngineCall::DisconnectFromPeer
                    | EngineCall::DisconnectFromPeerDone
                    | EngineCall::DisconnectFromServer
                    | EngineCall::DisconnectFromServerDone
            )
        })
        .collect();
    assert_eq!(
        teardown,
        vec![
            EngineCall::CancelConnectingToPeer,
            EngineCall::DisconnectFromPeer,
            EngineCall::DisconnectFromPeerDone,
            EngineCall::DisconnectFromServer,
            EngineCall::DisconnectFromServerDone,
        ]
    );
    assert_eq!(h.controller.state(), &SessionState::default());
    assert_eq!(h.stay_awake.outstanding(), 0);
    assert!(drain_notices(&mut notices).is_empty());
}

#[tokio::test]
async fn suspend_keeps_going_when_a_step_fails() {
    let mut h = harness(MockEngine {
        fail_disconnect_from_peer: true,
        ..MockEngine::new()
    });
    sign_in(&mut h).await;
    call_p1(&mut h).await;
    let mut notices = h.controller.subscribe_notices();

    h.controller.on_app_suspending().await;

    let calls = h.engine.calls().await;
    assert!(calls.contains(&EngineCall::DisconnectFromServerDone));
    assert_eq!(h.controller.state(), &SessionState::default());
    assert!(drain_notices(&mut notices).is_empty());
}

#[tokio::test]
async fn completions_from_before_suspend_are_dropped() {
    let mut h = harness(MockEngine {
        fail_login: true,
        ..MockEngine::new()
    });
    let mut notices = h.controller.subscribe_notices();

    h.controller.connect("10.10.50.158", "8888");
    h.controller.on_app_suspending().await;
    h.controller.settle().await;

    assert_eq!(h.controller.state(), &SessionState::default());
    assert!(drain_notices(&mut notices).is_empty());
    assert!(h
        .engine
        .calls()
        .await
        .contains(&EngineCall::DisconnectFromServer));
}

#[tokio::test]
async fn start_enumerates_devices_and_restores_capture_format() {
    let mut settings = PersistedSettings::default();
    settings.remember_capture_format(fmt(1280, 720, 30));
    let mut h = harness_with_settings(MockEngine::new(), settings);

    h.controller
        .start(vec![IceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            ..IceServer::default()
        }])
        .await;
    h.controller.settle().await;

    let devices = h.controller.devices();
    assert_eq!(
        devices.selected(DeviceKind::VideoCapture).map(|d| d.id.as_str()),
        Some("cam-1")
    );
    assert_eq!(devices.selected_format(), Some(fmt(1280, 720, 30)));

    let calls = h.engine.calls().await;
    assert_eq!(calls.first(), Some(&EngineCall::ConfigureIceServers(1)));
    for expected in [
        EngineCall::SelectDevice(DeviceKind::VideoCapture, DeviceId::from("cam-1")),
        EngineCall::SelectDevice(DeviceKind::AudioCapture, DeviceId::from("mic-1")),
        EngineCall::SelectDevice(DeviceKind::AudioPlayout, DeviceId::from("spk-1")),
        EngineCall::CaptureFormats(DeviceId::from("cam-1")),
        EngineCall::SelectCaptureFormat(fmt(1280, 720, 30)),
    ] {
        assert!(calls.contains(&expected), "missing {expected:?} in {calls:?}");
    }
}

#[tokio::test]
async fn enumeration_failure_keeps_last_known_good_list() {
    let mut h = harness(MockEngine::new());
    h.controller.start(Vec::new()).await;
    h.controller.settle().await;
    let mut notices = h.controller.subscribe_notices();

    h.engine.fail_enumeration.store(true, Ordering::SeqCst);
    h.controller
        .handle_engine_event(EngineEvent::MediaDevicesChanged {
            kind: DeviceKind::VideoCapture,
        });
    h.controller.settle().await;

    assert_eq!(h.controller.devices().devices(DeviceKind::VideoCapture).len(), 2);
    let notices = drain_notices(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, NoticeCode::DeviceEnumerationFailed);
}

#[tokio::test]
async fn unplugged_camera_is_replaced_and_choice_persisted() {
    let mut h = harness(MockEngine::new());
    h.controller.start(Vec::new()).await;
    h.controller.settle().await;

    h.controller
        .select_device(DeviceKind::VideoCapture, DeviceId::from("cam-2"));
    h.controller.settle().await;
    h.controller.select_capture_format(fmt(640, 480, 30));
    h.controller.settle().await;
    let saved = h.store.load().expect("load");
    assert_eq!(saved.preferred_resolution(), Some((640, 480)));
    assert_eq!(saved.frame_rate, Some(30));

    h.engine.devices.lock().await.insert(
        DeviceKind::VideoCapture,
        vec![MediaDevice::new("cam-1", "Front Camera")],
    );
    h.controller
        .handle_engine_event(EngineEvent::MediaDevicesChanged {
            kind: DeviceKind::VideoCapture,
        });
    h.controller.settle().await;

    let devices = h.controller.devices();
    assert_eq!(
        devices.selected(DeviceKind::VideoCapture).map(|d| d.id.as_str()),
        Some("cam-1")
    );
    assert_eq!(devices.selected_format(), Some(fmt(640, 480, 30)));
}

#[tokio::test]
async fn missing_engine_surfaces_notices_without_state_change() {
    let mut controller = SessionController::new(
        Arc::new(MissingPeerEngine::default()),
        Arc::new(NoopStayAwake),
        Arc::new(MemorySettingsStore::default()),
        16,
    );
    let mut notices = controller.subscribe_notices();

    controller.start(Vec::new()).await;
    controller.connect("10.10.50.158", "8888");
    controller.settle().await;

    assert_eq!(controller.state(), &SessionState::default());
    let codes: Vec<_> = drain_notices(&mut notices)
        .into_iter()
        .map(|notice| notice.code)
        .collect();
    assert_eq!(
        codes
            .iter()
            .filter(|code| **code == NoticeCode::DeviceEnumerationFailed)
            .count(),
        3
    );
    assert_eq!(
        codes
            .iter()
            .filter(|code| **code == NoticeCode::ServerConnectionFailed)
            .count(),
        1
    );
}

#[tokio::test]
async fn settle_returns_when_an_engine_call_panics() {
    let mut h = harness(MockEngine {
        panic_on_enumeration: true,
        ..MockEngine::new()
    });

    h.controller.start(Vec::new()).await;
    tokio::time::timeout(Duration::from_secs(2), h.controller.settle())
        .await
        .expect("settle drained the lost calls");

    assert!(h
        .controller
        .devices()
        .devices(DeviceKind::VideoCapture)
        .is_empty());

    h.controller.connect("10.10.50.158", "8888");
    h.controller.settle().await;
    h.controller.handle_engine_event(EngineEvent::SignedIn);
    assert!(h.controller.state().is_connected());
}

#[tokio::test]
async fn shutdown_command_tears_the_session_down() {
    let mut h = harness(MockEngine::new());
    sign_in(&mut h).await;
    call_p1(&mut h).await;

    h.controller.handle_command(SessionCommand::Shutdown).await;

    assert_eq!(h.controller.state(), &SessionState::default());
    assert_eq!(h.stay_awake.outstanding(), 0);
    let calls = h.engine.calls().await;
    assert!(calls.contains(&EngineCall::DisconnectFromPeer));
    assert!(calls.contains(&EngineCall::DisconnectFromServer));
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("controller alive");
        }
    })
    .await
    .expect("snapshot condition not reached")
}

#[tokio::test]
async fn spawned_controller_drives_full_session_through_handle() {
    let engine = Arc::new(MockEngine::scripted(vec![
        Peer::new("P1", "alice"),
        Peer::new("P2", "bob"),
    ]));
    let stay_awake = Arc::new(CountingStayAwake::default());
    let mut controller = SessionController::new(
        engine.clone(),
        stay_awake.clone(),
        Arc::new(MemorySettingsStore::default()),
        16,
    );
    controller.start(Vec::new()).await;
    let (handle, task) = controller.spawn(8);
    let mut snapshots = handle.watch();

    handle.connect("10.10.50.158", "8888").await.expect("send");
    let snapshot = wait_for(&mut snapshots, |s| {
        s.is_connected() && s.is_ready_to_connect() && s.peers().len() == 2
    })
    .await;
    assert_eq!(snapshot.peers()[0], Peer::new("P1", "alice"));

    handle.select_peer(Some(p1())).await.expect("send");
    handle.connect_to_selected_peer().await.expect("send");
    wait_for(&mut snapshots, |s| s.is_connected_to_peer() && s.can_disconnect_from_peer()).await;
    assert_eq!(stay_awake.acquires(), 1);

    handle.disconnect_from_peer().await.expect("send");
    wait_for(&mut snapshots, |s| !s.is_connected_to_peer() && s.is_ready_to_connect()).await;
    assert_eq!(stay_awake.releases(), 1);

    handle.connect_to_peer(PeerId::from("P2")).await.expect("send");
    wait_for(&mut snapshots, |s| s.is_connected_to_peer()).await;

    handle.suspend().await.expect("suspend");
    let snapshot = handle.snapshot();
    assert!(!snapshot.is_connected());
    assert!(snapshot.peers().is_empty());
    assert_eq!(stay_awake.outstanding(), 0);
    assert_eq!(
        snapshot
            .devices
            .selected(DeviceKind::AudioCapture)
            .map(|d| d.id.as_str()),
        Some("mic-1")
    );

    handle.shutdown().await.expect("shutdown");
    task.await.expect("controller task");
    assert!(matches!(
        handle.connect("10.10.50.158", "8888").await,
        Err(SessionError::ControllerStopped)
    ));
}
