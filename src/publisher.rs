//! State publication with freshness-over-completeness backpressure.
//!
//! The publisher hands snapshots to the I/O task through a capacity-one
//! slot: if the transport falls behind the tick rate, newer snapshots
//! overwrite queued ones and the overwritten frames are counted as dropped.
//! Memory use is constant no matter how long the peer stays away.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::codec::StateSnapshot;
use crate::metrics::BridgeMetrics;
use crate::session::{PendingState, SessionState};
use crate::sync::TickContext;
use crate::{BridgeError, Result};

pub(crate) struct TelemetryPublisher {
    outbound: watch::Sender<Option<PendingState>>,
    states: watch::Receiver<SessionState>,
    metrics: Arc<BridgeMetrics>,
    last_published_tick: Option<u64>,
}

impl TelemetryPublisher {
    pub(crate) fn new(
        outbound: watch::Sender<Option<PendingState>>,
        states: watch::Receiver<SessionState>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self { outbound, states, metrics, last_published_tick: None }
    }

    /// Queue one snapshot for the current tick.
    ///
    /// At most one snapshot per tick reaches the wire; a second publish for
    /// the same tick is an error in the host's tick loop. While the session
    /// is degraded or disconnected the snapshot is counted as dropped and
    /// the call succeeds, so the simulation never stalls on a dead link.
    pub(crate) fn publish(&mut self, snapshot: StateSnapshot, ctx: &TickContext) -> Result<()> {
        if self.last_published_tick == Some(ctx.tick_id) {
            return Err(BridgeError::DuplicatePublish { tick_id: ctx.tick_id });
        }
        self.last_published_tick = Some(ctx.tick_id);
        BridgeMetrics::incr(&self.metrics.frames_published);

        if *self.states.borrow() != SessionState::Synchronized {
            BridgeMetrics::incr(&self.metrics.frames_dropped);
            trace!(tick_id = ctx.tick_id, "dropping snapshot, session not synchronized");
            return Ok(());
        }

        if self.outbound.is_closed() {
            // I/O task gone; the bridge is shutting down.
            BridgeMetrics::incr(&self.metrics.frames_dropped);
            return Err(BridgeError::Shutdown);
        }

        let pending = PendingState { snapshot, tick_id: ctx.tick_id };
        // The I/O task resets the slot to `None` on consumption, so a
        // still-`Some` previous value is a snapshot that never made the wire.
        let overwritten = self.outbound.send_replace(Some(pending));
        if let Some(lost) = overwritten {
            BridgeMetrics::incr(&self.metrics.frames_dropped);
            trace!(tick_id = lost.tick_id, "overwrote unsent snapshot");
        }
        Ok(())
    }
}
