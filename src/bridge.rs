//! The bridge facade: handshake, tick loop entry point, observer taps.
//!
//! A [`Bridge`] is constructed once per session. Construction performs the
//! Hello/HelloAck version handshake on the caller's task, then hands both
//! transports to a dedicated I/O task and returns. From that point the host
//! drives the bridge from its fixed-rate tick loop via [`Bridge::run_tick`],
//! and may attach any number of read-side taps (session states, throttled
//! snapshot mirrors) that never backpressure the loop.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{
    ControlMessage, DecodeError, Frame, FramePayload, StateSnapshot, versions_compatible,
};
use crate::config::BridgeConfig;
use crate::dispatch::{AcceptedCommand, CommandDispatcher, CommandObserver};
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::publisher::TelemetryPublisher;
use crate::session::{SessionChannels, SessionState, now_ns, spawn_session};
use crate::stream::ThrottleExt;
use crate::sync::{TickContext, TickPhase, TickSynchronizer};
use crate::transport::{Role, Transport, UdpTransport};
use crate::{BridgeError, Result};

/// How long one handshake receive poll waits before re-checking the deadline.
const HANDSHAKE_POLL: Duration = Duration::from_millis(20);

/// Sequence number consumed by the Hello frame.
const HANDSHAKE_SEQUENCE: u64 = 1;

/// Simulator-side endpoint of a bridge session.
pub struct Bridge {
    publisher: TelemetryPublisher,
    synchronizer: TickSynchronizer,
    dispatcher: CommandDispatcher,
    states: watch::Receiver<SessionState>,
    snapshot_tap: watch::Receiver<Option<crate::session::PendingState>>,
    last_inbound_ns: Arc<std::sync::atomic::AtomicU64>,
    liveness_window: Duration,
    cancel: CancellationToken,
    metrics: Arc<BridgeMetrics>,
    last_accepted: Option<AcceptedCommand>,
}

impl Bridge {
    /// Open a session over caller-supplied transports.
    ///
    /// `out` carries state frames to the peer, `inp` carries command frames
    /// back. Blocks for at most the configured handshake timeout; a version
    /// mismatch or missing HelloAck is fatal.
    pub async fn connect<O, I>(config: BridgeConfig, mut out: O, mut inp: I) -> Result<Self>
    where
        O: Transport,
        I: Transport,
    {
        config.validate()?;

        handshake(
            &mut out,
            &mut inp,
            config.protocol_version,
            config.handshake_timeout(),
        )
        .await?;

        let metrics = Arc::new(BridgeMetrics::default());
        let SessionChannels { outbound, commands, states, last_inbound_ns, cancel } =
            spawn_session(
                out,
                inp,
                config.heartbeat_interval(),
                Arc::clone(&metrics),
                HANDSHAKE_SEQUENCE,
            );

        let snapshot_tap = outbound.subscribe();
        let publisher =
            TelemetryPublisher::new(outbound, states.clone(), Arc::clone(&metrics));
        let synchronizer = TickSynchronizer::new(
            config.mode,
            config.command_timeout(),
            commands,
            Arc::clone(&metrics),
        );
        let dispatcher = CommandDispatcher::new(config.limits, Arc::clone(&metrics));

        info!(mode = ?config.mode, "bridge session established");
        Ok(Self {
            publisher,
            synchronizer,
            dispatcher,
            states,
            snapshot_tap,
            last_inbound_ns,
            liveness_window: config.liveness_window(),
            cancel,
            metrics,
            last_accepted: None,
        })
    }

    /// Open a session over UDP using the configured endpoints.
    pub async fn connect_udp(config: BridgeConfig) -> Result<Self> {
        let (state_endpoint, command_endpoint) = config.endpoints()?;
        let out = UdpTransport::open(state_endpoint, Role::Publisher).await?;
        let inp = UdpTransport::open(command_endpoint, Role::Subscriber).await?;
        Self::connect(config, out, inp).await
    }

    /// Process one simulation tick.
    ///
    /// Publishes `snapshot`, waits for a command according to the
    /// synchronization mode, validates anything newly received, and returns
    /// the command the simulation should apply this tick. On lockstep
    /// timeout (or when a fresh command is rejected) the previously accepted
    /// command is returned unchanged; `None` means no command has ever been
    /// accepted this session.
    pub async fn run_tick(
        &mut self,
        snapshot: StateSnapshot,
        ctx: TickContext,
    ) -> Result<Option<AcceptedCommand>> {
        self.synchronizer.begin_tick();
        self.publisher.publish(snapshot, &ctx)?;
        self.synchronizer.mark_published();

        let outcome = self.synchronizer.wait_for_command(&ctx).await;
        debug_assert_eq!(self.synchronizer.phase(), TickPhase::Complete);
        if outcome.fresh
            && let Some(received) = outcome.command
        {
            match self.dispatcher.dispatch(received) {
                Ok(accepted) => self.last_accepted = Some(accepted),
                // Rejection leaves the previously accepted command in force.
                Err(rejected) => {
                    debug!(reason = %rejected.reason, "holding previous command");
                }
            }
        }
        Ok(self.last_accepted)
    }

    /// Replace the default logging observer for dispatch verdicts.
    pub fn set_command_observer(&mut self, observer: Box<dyn CommandObserver>) {
        self.dispatcher.set_observer(observer);
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        *self.states.borrow()
    }

    /// Stream of session state transitions. Coalesces under a slow reader;
    /// the latest state is always delivered.
    pub fn session_states(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.states.clone())
    }

    /// Read-side mirror of published snapshots, rate-limited to `max_hz`.
    ///
    /// Intended for dashboards and recorders; a slow consumer sees fewer,
    /// fresher snapshots and never slows the tick loop down.
    pub fn snapshot_stream(
        &self,
        max_hz: u32,
    ) -> impl Stream<Item = StateSnapshot> + Send + use<> {
        use futures::StreamExt;

        let period = Duration::from_secs(1) / max_hz.max(1);
        WatchStream::new(self.snapshot_tap.clone())
            .filter_map(|pending| futures::future::ready(pending.map(|p| p.snapshot)))
            .throttle(period)
    }

    /// Whether anything has arrived from the peer within the liveness
    /// window. The original control stack treats a silent peer as gone
    /// after 500ms; hosts use this to trigger a safe stop.
    pub fn is_peer_alive(&self) -> bool {
        let last = self.last_inbound_ns.load(Ordering::Relaxed);
        now_ns().saturating_sub(last) <= self.liveness_window.as_nanos() as u64
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Tear the session down: the I/O task sends a best-effort Bye and
    /// closes both transports. Waits (bounded) for the task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();

        let wait = async {
            loop {
                if *self.states.borrow_and_update() == SessionState::Disconnected {
                    return;
                }
                if self.states.changed().await.is_err() {
                    // Task gone entirely; that also counts as down.
                    return;
                }
            }
        };
        match tokio::time::timeout(Duration::from_secs(1), wait).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!("session task did not confirm shutdown in time");
                Err(BridgeError::timed_out(Duration::from_secs(1)))
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("session_state", &self.session_state())
            .field("liveness_window", &self.liveness_window)
            .field("last_accepted", &self.last_accepted)
            .finish_non_exhaustive()
    }
}

/// Hello/HelloAck exchange. Run on the caller's task before the session
/// spawns, so a failed handshake leaves nothing behind to clean up.
async fn handshake<O, I>(
    out: &mut O,
    inp: &mut I,
    local_version: u16,
    timeout: Duration,
) -> Result<()>
where
    O: Transport,
    I: Transport,
{
    let hello = Frame::new(
        HANDSHAKE_SEQUENCE,
        0,
        now_ns(),
        FramePayload::Control(ControlMessage::Hello { version: local_version }),
    )
    .encode();

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BridgeError::handshake_failed(format!(
                "no HelloAck within {timeout:?}"
            )));
        }

        // Datagrams can vanish in flight; repeat the offer on every poll
        // until the peer acknowledges.
        out.send(&hello).await?;
        debug!(version = %format_args!("{local_version:#06x}"), "hello sent");

        let bytes = match inp.try_receive(remaining.min(HANDSHAKE_POLL)).await? {
            Some(bytes) => bytes,
            None => continue,
        };

        match Frame::decode(&bytes) {
            Ok(frame) => match frame.payload {
                FramePayload::Control(ControlMessage::HelloAck { version }) => {
                    if !versions_compatible(local_version, version) {
                        return Err(BridgeError::VersionMismatch {
                            local: local_version,
                            peer: version,
                        });
                    }
                    debug!(version = %format_args!("{version:#06x}"), "hello acknowledged");
                    return Ok(());
                }
                other => {
                    debug!(kind = ?other.kind(), "ignoring pre-handshake frame");
                }
            },
            // An incompatible header is a definitive answer, not noise.
            Err(DecodeError::VersionMismatch { found, .. }) => {
                return Err(BridgeError::VersionMismatch { local: local_version, peer: found });
            }
            Err(e) => {
                warn!("discarding undecodable frame during handshake: {e}");
            }
        }
    }
}
