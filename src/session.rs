//! Transport session: socket ownership, sequence continuity, reconnection.
//!
//! The session runs on a dedicated I/O task that exclusively owns both
//! transport endpoints. The tick thread talks to it only through bounded
//! queues: a capacity-1 latest-wins outbound slot (freshness over
//! completeness) and a watch of the most recently decoded command. The task
//! is the single writer of the session state.
//!
//! On transport failure the session transitions to `Degraded` and retries
//! with exponential backoff (100ms doubling to a 5s cap). Sequence numbers
//! continue across reconnects so the peer can tell gaps from resets.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{ControlMessage, Frame, FramePayload, StateSnapshot, VehicleCommand};
use crate::metrics::BridgeMetrics;
use crate::transport::Transport;

/// How long one receive poll waits before yielding back to the select loop.
const RECEIVE_POLL: Duration = Duration::from_millis(5);

/// Reconnect backoff bounds.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Connection lifecycle state. The I/O task is the sole writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Synchronized,
    Degraded,
}

/// Wall clock, nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

/// A decoded inbound command together with its frame metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceivedCommand {
    pub command: VehicleCommand,
    /// Tick the peer computed this command for.
    pub tick_id: u64,
    /// Inbound sequence number; used to tell fresh commands from held ones.
    pub sequence: u64,
    /// Peer wall clock at emission.
    pub timestamp_ns: u64,
}

/// State snapshot staged for emission; replaced, never queued.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingState {
    pub snapshot: StateSnapshot,
    pub tick_id: u64,
}

/// Queues and signals connecting the tick side to the I/O task.
pub(crate) struct SessionChannels {
    pub outbound: watch::Sender<Option<PendingState>>,
    pub commands: watch::Receiver<Option<ReceivedCommand>>,
    pub states: watch::Receiver<SessionState>,
    pub last_inbound_ns: Arc<AtomicU64>,
    pub cancel: CancellationToken,
}

/// Spawn the I/O task owning both transports.
///
/// `initial_sequence` continues the outbound numbering from wherever the
/// handshake left it; it is never reset for the life of the session.
pub(crate) fn spawn_session<O, I>(
    out: O,
    inp: I,
    heartbeat_interval: Duration,
    metrics: Arc<BridgeMetrics>,
    initial_sequence: u64,
) -> SessionChannels
where
    O: Transport,
    I: Transport,
{
    let (outbound_tx, outbound_rx) = watch::channel(None);
    let (command_tx, command_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(SessionState::Synchronized);
    let last_inbound_ns = Arc::new(AtomicU64::new(now_ns()));
    let cancel = CancellationToken::new();

    let task = SessionTask {
        out,
        inp,
        outbound_tx: outbound_tx.clone(),
        outbound_rx,
        command_tx,
        state_tx,
        last_inbound_ns: Arc::clone(&last_inbound_ns),
        cancel: cancel.clone(),
        metrics,
        heartbeat_interval,
        local_sequence: initial_sequence,
        remote_sequence: None,
        last_published_tick: 0,
    };
    tokio::spawn(task.run());

    SessionChannels {
        outbound: outbound_tx,
        commands: command_rx,
        states: state_rx,
        last_inbound_ns,
        cancel,
    }
}

struct SessionTask<O, I> {
    out: O,
    inp: I,
    /// Sender side of the outbound slot; used to take a staged snapshot
    /// and leave `None` behind, so the publisher can tell an unsent
    /// overwrite from a consumed value.
    outbound_tx: watch::Sender<Option<PendingState>>,
    outbound_rx: watch::Receiver<Option<PendingState>>,
    command_tx: watch::Sender<Option<ReceivedCommand>>,
    state_tx: watch::Sender<SessionState>,
    last_inbound_ns: Arc<AtomicU64>,
    cancel: CancellationToken,
    metrics: Arc<BridgeMetrics>,
    heartbeat_interval: Duration,
    local_sequence: u64,
    remote_sequence: Option<u64>,
    last_published_tick: u64,
}

impl<O, I> SessionTask<O, I>
where
    O: Transport,
    I: Transport,
{
    async fn run(mut self) {
        info!("session I/O task started");
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("session I/O task cancelled");
                    break;
                }
                changed = self.outbound_rx.changed() => {
                    if changed.is_err() {
                        debug!("publisher side dropped, session ending");
                        break;
                    }
                    self.outbound_rx.borrow_and_update();
                    // Atomically take the staged snapshot. Our own reset
                    // raises one spurious wakeup, which the next iteration
                    // observes as an empty slot and skips.
                    let pending = self.outbound_tx.send_replace(None);
                    if let Some(pending) = pending
                        && !self.emit_state(pending).await
                    {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if !self.emit_heartbeat().await {
                        break;
                    }
                }
                received = self.inp.try_receive(RECEIVE_POLL) => {
                    match received {
                        Ok(Some(bytes)) => self.handle_inbound(&bytes),
                        Ok(None) => {}
                        Err(e) => {
                            warn!("command receive failed: {e}");
                            if !self.reconnect().await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Send a state frame; on failure enter reconnect. Returns false when
    /// the session should end (cancelled mid-backoff).
    async fn emit_state(&mut self, pending: PendingState) -> bool {
        self.last_published_tick = pending.tick_id;
        self.local_sequence += 1;
        let frame = Frame::new(
            self.local_sequence,
            pending.tick_id,
            now_ns(),
            FramePayload::State(pending.snapshot),
        );
        match self.out.send(&frame.encode()).await {
            Ok(()) => {
                BridgeMetrics::incr(&self.metrics.frames_sent);
                trace!(sequence = frame.sequence, tick_id = frame.tick_id, "state frame sent");
                true
            }
            Err(e) => {
                warn!("state send failed: {e}");
                self.reconnect().await
            }
        }
    }

    async fn emit_heartbeat(&mut self) -> bool {
        self.local_sequence += 1;
        let frame = Frame::new(
            self.local_sequence,
            self.last_published_tick,
            now_ns(),
            FramePayload::Heartbeat,
        );
        match self.out.send(&frame.encode()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("heartbeat send failed: {e}");
                self.reconnect().await
            }
        }
    }

    /// Decode and route one inbound datagram. Decode failures discard the
    /// frame and count it; they never tear the session down.
    fn handle_inbound(&mut self, bytes: &[u8]) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                BridgeMetrics::incr(&self.metrics.decode_errors);
                warn!("discarding inbound frame: {e}");
                return;
            }
        };

        BridgeMetrics::incr(&self.metrics.frames_received);

        if let Some(last) = self.remote_sequence {
            if frame.sequence <= last {
                trace!(
                    sequence = frame.sequence,
                    last, "dropping duplicate or reordered frame"
                );
                return;
            }
            let gap = frame.sequence - last - 1;
            if gap > 0 {
                self.metrics.sequence_gaps.fetch_add(gap, Ordering::Relaxed);
                debug!(gap, "inbound sequence gap");
            }
        }
        self.remote_sequence = Some(frame.sequence);
        self.last_inbound_ns.store(now_ns(), Ordering::Relaxed);

        // Any valid inbound traffic proves the peer is back.
        if *self.state_tx.borrow() == SessionState::Disconnected {
            info!("peer traffic resumed");
            let _ = self.state_tx.send(SessionState::Synchronized);
        }

        match frame.payload {
            FramePayload::Command(command) => {
                let received = ReceivedCommand {
                    command,
                    tick_id: frame.tick_id,
                    sequence: frame.sequence,
                    timestamp_ns: frame.timestamp_ns,
                };
                trace!(
                    sequence = received.sequence,
                    tick_id = received.tick_id,
                    "command frame received"
                );
                let _ = self.command_tx.send(Some(received));
            }
            FramePayload::Heartbeat => {
                trace!(sequence = frame.sequence, "heartbeat received");
            }
            FramePayload::Control(ControlMessage::Bye) => {
                info!("peer closed the session");
                let _ = self.state_tx.send(SessionState::Disconnected);
            }
            FramePayload::Control(_) => {
                debug!("ignoring control frame after handshake");
            }
            FramePayload::State(_) => {
                debug!("ignoring state frame on the command direction");
            }
        }
    }

    /// Reconnect both endpoints with bounded exponential backoff.
    ///
    /// Returns true once reconnected; false if cancelled while retrying.
    /// `local_sequence` is deliberately untouched so downstream consumers
    /// can tell gaps from resets.
    async fn reconnect(&mut self) -> bool {
        let _ = self.state_tx.send(SessionState::Degraded);
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            BridgeMetrics::incr(&self.metrics.reconnect_attempts);
            let _ = self.state_tx.send(SessionState::Connecting);

            let reopened = match self.out.reopen().await {
                Ok(()) => self.inp.reopen().await,
                Err(e) => Err(e),
            };
            match reopened {
                Ok(()) => {
                    info!("transports reopened, session synchronized");
                    let _ = self.state_tx.send(SessionState::Synchronized);
                    return true;
                }
                Err(e) => {
                    let _ = self.state_tx.send(SessionState::Degraded);
                    debug!("reconnect failed, retrying in {backoff:?}: {e}");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    async fn teardown(mut self) {
        let _ = self.state_tx.send(SessionState::Disconnected);

        // Best-effort goodbye so the peer can distinguish shutdown from loss.
        self.local_sequence += 1;
        let bye = Frame::new(
            self.local_sequence,
            self.last_published_tick,
            now_ns(),
            FramePayload::Control(ControlMessage::Bye),
        );
        let _ = self.out.send(&bye.encode()).await;

        let _ = self.out.close().await;
        let _ = self.inp.close().await;
        info!("session I/O task ended");
    }
}
