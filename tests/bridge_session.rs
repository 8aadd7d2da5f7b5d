//! End-to-end bridge tests over in-process transports.
//!
//! The peer side scripts an autonomy stack by hand: it answers the
//! handshake on the command direction and feeds command frames while
//! reading state frames off the state direction.

use std::time::Duration;

use simbridge::{
    Bridge, BridgeConfig, Frame, FrameKind, FramePayload, GearState, MemoryTransport, Result,
    SessionState, StateSnapshot, SyncMode, TickContext, Transport, VehicleCommand,
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn now_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
}

struct Peer {
    /// Receives state and heartbeat frames from the bridge.
    state: MemoryTransport,
    /// Sends handshake acks and command frames to the bridge.
    command: MemoryTransport,
    next_sequence: u64,
}

impl Peer {
    /// Build a bridge/peer pair with the HelloAck already queued, so
    /// `Bridge::connect` completes without a concurrent task.
    async fn establish(config: BridgeConfig) -> Result<(Bridge, Peer)> {
        let (out, state) = MemoryTransport::pair();
        let (inp, command) = MemoryTransport::pair();
        let mut peer = Peer { state, command, next_sequence: 0 };

        peer.send_payload(FramePayload::Control(simbridge::codec::ControlMessage::HelloAck {
            version: simbridge::PROTOCOL_VERSION,
        }))
        .await?;

        let bridge = Bridge::connect(config, out, inp).await?;
        Ok((bridge, peer))
    }

    async fn send_payload(&mut self, payload: FramePayload) -> Result<()> {
        self.next_sequence += 1;
        let frame = Frame::new(self.next_sequence, 0, now_ns(), payload);
        self.command.send(&frame.encode()).await
    }

    async fn send_command(&mut self, tick_id: u64, command: VehicleCommand) -> Result<()> {
        self.next_sequence += 1;
        let frame =
            Frame::new(self.next_sequence, tick_id, now_ns(), FramePayload::Command(command));
        self.command.send(&frame.encode()).await
    }

    /// Read frames until one matches, bounded by attempts.
    async fn recv_until(&mut self, mut pred: impl FnMut(&Frame) -> bool) -> Frame {
        for _ in 0..100 {
            let bytes = self
                .state
                .try_receive(Duration::from_secs(1))
                .await
                .unwrap()
                .expect("expected a frame from the bridge");
            let frame = Frame::decode(&bytes).unwrap();
            if pred(&frame) {
                return frame;
            }
        }
        panic!("expected frame not observed");
    }
}

fn drive_command(throttle: f32) -> VehicleCommand {
    VehicleCommand {
        throttle,
        gear_state: GearState::Drive,
        gear_num: 1,
        ..VehicleCommand::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_and_state_publication() -> anyhow::Result<()> {
    init_tracing();
    let (mut bridge, mut peer) = Peer::establish(BridgeConfig::default()).await?;
    assert_eq!(bridge.session_state(), SessionState::Synchronized);
    assert!(format!("{bridge:?}").contains("session_state"));

    bridge.run_tick(StateSnapshot::default(), TickContext::new(1)).await?;
    let frame = peer.recv_until(|f| f.kind() == FrameKind::State).await;
    assert_eq!(frame.tick_id, 1);

    // A consumed snapshot is not a drop.
    assert_eq!(bridge.metrics().frames_dropped, 0);

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incompatible_peer_version_fails_the_handshake() {
    init_tracing();
    let (out, _state) = MemoryTransport::pair();
    let (inp, mut command) = MemoryTransport::pair();

    // Peer answers with a different protocol major.
    let ack = Frame::new(
        1,
        0,
        now_ns(),
        FramePayload::Control(simbridge::codec::ControlMessage::HelloAck { version: 0x0200 }),
    );
    command.send(&ack.encode()).await.unwrap();

    let err = Bridge::connect(BridgeConfig::default(), out, inp).await.unwrap_err();
    assert!(matches!(
        err,
        simbridge::BridgeError::VersionMismatch { local: 0x0100, peer: 0x0200 }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incompatible_frame_header_fails_the_handshake() {
    init_tracing();
    let (out, _state) = MemoryTransport::pair();
    let (inp, mut command) = MemoryTransport::pair();

    let ack = Frame::new(
        1,
        0,
        now_ns(),
        FramePayload::Control(simbridge::codec::ControlMessage::HelloAck {
            version: simbridge::PROTOCOL_VERSION,
        }),
    );
    let mut bytes = ack.encode();
    // Rewrite the header version to major 2. The checksum only covers the
    // payload, so the frame still parses far enough to report the version.
    bytes[4..6].copy_from_slice(&0x0200u16.to_le_bytes());
    command.send(&bytes).await.unwrap();

    let err = Bridge::connect(BridgeConfig::default(), out, inp).await.unwrap_err();
    assert!(matches!(err, simbridge::BridgeError::VersionMismatch { peer: 0x0200, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lockstep_timeout_reuses_the_previous_command() -> anyhow::Result<()> {
    init_tracing();
    let config = BridgeConfig {
        mode: SyncMode::Lockstep,
        command_timeout_ms: 50,
        ..BridgeConfig::default()
    };
    let (mut bridge, mut peer) = Peer::establish(config).await?;

    peer.send_command(1, drive_command(0.6)).await?;
    let applied = bridge
        .run_tick(StateSnapshot::default(), TickContext::new(1))
        .await?
        .expect("command for tick 1");
    assert_eq!(applied.tick_id, 1);
    assert_eq!(applied.command.throttle, 0.6);

    // No command for tick 2: the wait times out and the tick-1 command
    // stays in force without being re-dispatched.
    let held = bridge
        .run_tick(StateSnapshot::default(), TickContext::new(2))
        .await?
        .expect("held command");
    assert_eq!(held.tick_id, 1);
    assert_eq!(held.sequence, applied.sequence);

    let metrics = bridge.metrics();
    assert_eq!(metrics.command_timeouts, 1);
    assert_eq!(metrics.commands_accepted, 1);

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_command_is_rejected_and_previous_held() -> anyhow::Result<()> {
    init_tracing();
    let (mut bridge, mut peer) = Peer::establish(BridgeConfig::default()).await?;

    peer.send_command(5, drive_command(0.5)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let applied = bridge
        .run_tick(StateSnapshot::default(), TickContext::new(5))
        .await?
        .expect("command for tick 5");
    assert_eq!(applied.tick_id, 5);

    // A late command for tick 4 arrives after tick 5 was accepted.
    peer.send_command(4, drive_command(0.9)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let held = bridge
        .run_tick(StateSnapshot::default(), TickContext::new(6))
        .await?
        .expect("held command");
    assert_eq!(held.tick_id, 5);
    assert_eq!(held.command.throttle, 0.5);

    assert_eq!(bridge.metrics().commands_rejected, 1);

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_range_command_is_rejected() -> anyhow::Result<()> {
    init_tracing();
    let (mut bridge, mut peer) = Peer::establish(BridgeConfig::default()).await?;

    let bad = VehicleCommand { brake: 4.0, ..VehicleCommand::default() };
    peer.send_command(1, bad).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let applied = bridge.run_tick(StateSnapshot::default(), TickContext::new(1)).await?;
    assert!(applied.is_none());
    assert_eq!(bridge.metrics().commands_rejected, 1);

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn degraded_session_drops_snapshots_without_blocking() -> anyhow::Result<()> {
    init_tracing();
    let (out, state) = MemoryTransport::pair();
    let fault = out.fault_handle();
    let (inp, command) = MemoryTransport::pair();
    let mut peer = Peer { state, command, next_sequence: 0 };
    peer.send_payload(FramePayload::Control(simbridge::codec::ControlMessage::HelloAck {
        version: simbridge::PROTOCOL_VERSION,
    }))
    .await?;
    let mut bridge = Bridge::connect(BridgeConfig::default(), out, inp).await?;

    // Break the outbound link; the next emission degrades the session and
    // reopen keeps failing while the fault is held.
    fault.set_failing(true);
    bridge.run_tick(StateSnapshot::default(), TickContext::new(1)).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while bridge.session_state() != SessionState::Degraded {
        assert!(tokio::time::Instant::now() < deadline, "session never degraded");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The tick loop keeps running at full rate; snapshots are counted as
    // dropped instead of queueing anywhere.
    let start = tokio::time::Instant::now();
    for tick in 2..=101u64 {
        bridge.run_tick(StateSnapshot::default(), TickContext::new(tick)).await?;
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    let metrics = bridge.metrics();
    assert_eq!(metrics.frames_published, 101);
    assert!(metrics.frames_dropped >= 100);
    assert!(metrics.reconnect_attempts >= 1);

    // Healing the link restores delivery.
    fault.set_failing(false);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while bridge.session_state() != SessionState::Synchronized {
        assert!(tokio::time::Instant::now() < deadline, "session never recovered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bridge.run_tick(StateSnapshot::default(), TickContext::new(102)).await?;
    let frame = peer.recv_until(|f| f.kind() == FrameKind::State).await;
    assert_eq!(frame.tick_id, 102);

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeats_flow_between_publishes() -> anyhow::Result<()> {
    init_tracing();
    let config = BridgeConfig { heartbeat_interval_ms: 10, ..BridgeConfig::default() };
    let (bridge, mut peer) = Peer::establish(config).await?;

    // No publishes at all; heartbeats alone keep the wire warm.
    let frame = peer.recv_until(|f| f.kind() == FrameKind::Heartbeat).await;
    assert!(frame.sequence >= 1);

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_silence_trips_the_liveness_window() -> anyhow::Result<()> {
    init_tracing();
    let config = BridgeConfig { liveness_window_ms: 100, ..BridgeConfig::default() };
    let (bridge, mut peer) = Peer::establish(config).await?;
    assert!(bridge.is_peer_alive());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!bridge.is_peer_alive());

    // Any inbound traffic revives it.
    peer.send_payload(FramePayload::Heartbeat).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bridge.is_peer_alive());

    bridge.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_announces_bye() -> anyhow::Result<()> {
    init_tracing();
    let (bridge, mut peer) = Peer::establish(BridgeConfig::default()).await?;

    bridge.shutdown().await?;

    // The state direction also carries the handshake Hello; skip past it
    // and anything else until the goodbye itself.
    let frame = peer
        .recv_until(|f| {
            matches!(f.payload, FramePayload::Control(simbridge::codec::ControlMessage::Bye))
        })
        .await;
    assert_eq!(frame.kind(), FrameKind::Control);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_stream_mirrors_published_states() -> anyhow::Result<()> {
    init_tracing();
    use futures::StreamExt;

    let (mut bridge, _peer) = Peer::establish(BridgeConfig::default()).await?;
    let mut mirror = Box::pin(bridge.snapshot_stream(1_000));

    let mut snapshot = StateSnapshot::default();
    snapshot.gear_num = 3;
    bridge.run_tick(snapshot, TickContext::new(1)).await?;

    let seen = tokio::time::timeout(Duration::from_secs(1), mirror.next())
        .await?
        .expect("mirrored snapshot");
    assert_eq!(seen.gear_num, 3);

    bridge.shutdown().await?;
    Ok(())
}
