//! Tick synchronization between the simulation clock and transport I/O.
//!
//! The synchronizer decides, once per simulation tick, how long to wait for
//! an inbound command before the tick proceeds without one. Two modes:
//!
//! - **Lockstep**: wait (bounded by the configured timeout) for a command
//!   addressed to the current or a later tick; on timeout reuse the
//!   previously delivered command (hold-last) and record the timeout.
//! - **Asynchronous**: never wait; apply the most recently received command
//!   regardless of its tick, and expose `tick_now - command.tick_id` as a
//!   staleness gauge.
//!
//! The mode is fixed for the session's lifetime. Tick context is passed in
//! explicitly on every call; there is no global simulation clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::SyncMode;
use crate::metrics::BridgeMetrics;
use crate::session::{ReceivedCommand, now_ns};

/// Explicit per-tick context handed in by the simulation.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    /// The simulation tick being processed.
    pub tick_id: u64,
    /// Wall clock at tick start, nanoseconds since the Unix epoch.
    pub now_ns: u64,
}

impl TickContext {
    /// Context for `tick_id`, stamped with the current wall clock.
    pub fn new(tick_id: u64) -> Self {
        Self { tick_id, now_ns: now_ns() }
    }
}

/// Where the synchronizer is within the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    AwaitPublish,
    Published,
    AwaitCommand,
    CommandReceived,
    TimedOut,
    Complete,
}

/// Result of one tick's command wait.
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    /// The command to apply this tick, if any was ever received.
    pub command: Option<ReceivedCommand>,
    /// True when `command` arrived new this tick rather than being held
    /// over from an earlier one. Only fresh commands are dispatched.
    pub fresh: bool,
    /// True when a lockstep wait elapsed without a command.
    pub timed_out: bool,
    /// `tick_now - command.tick_id` for the applied command.
    pub staleness_ticks: Option<u64>,
}

pub(crate) struct TickSynchronizer {
    mode: SyncMode,
    command_timeout: Duration,
    commands: watch::Receiver<Option<ReceivedCommand>>,
    /// Most recently delivered command, reused on lockstep timeout.
    held: Option<ReceivedCommand>,
    /// Sequence of the last command handed out, to mark reuse as not fresh.
    delivered_sequence: Option<u64>,
    phase: TickPhase,
    metrics: Arc<BridgeMetrics>,
}

impl TickSynchronizer {
    pub(crate) fn new(
        mode: SyncMode,
        command_timeout: Duration,
        commands: watch::Receiver<Option<ReceivedCommand>>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            mode,
            command_timeout,
            commands,
            held: None,
            delivered_sequence: None,
            phase: TickPhase::AwaitPublish,
            metrics,
        }
    }

    pub(crate) fn phase(&self) -> TickPhase {
        self.phase
    }

    pub(crate) fn begin_tick(&mut self) {
        self.phase = TickPhase::AwaitPublish;
    }

    pub(crate) fn mark_published(&mut self) {
        self.phase = TickPhase::Published;
    }

    /// Resolve this tick's command according to the mode.
    pub(crate) async fn wait_for_command(&mut self, ctx: &TickContext) -> TickOutcome {
        self.phase = TickPhase::AwaitCommand;

        let outcome = match self.mode {
            SyncMode::Asynchronous => self.resolve_async(ctx),
            SyncMode::Lockstep => self.resolve_lockstep(ctx).await,
        };

        if let Some(command) = outcome.command {
            self.delivered_sequence = Some(command.sequence);
        }
        self.phase = TickPhase::Complete;
        outcome
    }

    fn resolve_async(&mut self, ctx: &TickContext) -> TickOutcome {
        if let Some(latest) = *self.commands.borrow_and_update() {
            self.held = Some(latest);
        }

        match self.held {
            Some(command) => {
                let staleness = ctx.tick_id.saturating_sub(command.tick_id);
                BridgeMetrics::set(&self.metrics.last_staleness_ticks, staleness);
                trace!(
                    tick_id = ctx.tick_id,
                    command_tick = command.tick_id,
                    staleness, "applying latest command"
                );
                self.phase = TickPhase::CommandReceived;
                TickOutcome {
                    command: Some(command),
                    fresh: self.delivered_sequence != Some(command.sequence),
                    timed_out: false,
                    staleness_ticks: Some(staleness),
                }
            }
            None => TickOutcome {
                command: None,
                fresh: false,
                timed_out: false,
                staleness_ticks: None,
            },
        }
    }

    async fn resolve_lockstep(&mut self, ctx: &TickContext) -> TickOutcome {
        let deadline = Instant::now() + self.command_timeout;

        loop {
            if let Some(latest) = *self.commands.borrow_and_update() {
                self.held = Some(latest);
                if latest.tick_id >= ctx.tick_id {
                    self.phase = TickPhase::CommandReceived;
                    return TickOutcome {
                        command: Some(latest),
                        fresh: self.delivered_sequence != Some(latest.sequence),
                        timed_out: false,
                        staleness_ticks: Some(ctx.tick_id.saturating_sub(latest.tick_id)),
                    };
                }
                // A command for an older tick: keep it as hold-last material
                // but keep waiting for the current tick's command.
                trace!(
                    tick_id = ctx.tick_id,
                    command_tick = latest.tick_id,
                    "lockstep ignoring old command"
                );
            }

            match tokio::time::timeout_at(deadline, self.commands.changed()).await {
                Ok(Ok(())) => continue,
                // I/O task gone; treat like a timeout so the tick completes.
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }

        BridgeMetrics::incr(&self.metrics.command_timeouts);
        debug!(
            tick_id = ctx.tick_id,
            timeout = ?self.command_timeout,
            "lockstep command timeout, reusing previous command"
        );
        self.phase = TickPhase::TimedOut;
        TickOutcome {
            command: self.held,
            fresh: false,
            timed_out: true,
            staleness_ticks: self.held.map(|c| ctx.tick_id.saturating_sub(c.tick_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VehicleCommand;

    fn received(sequence: u64, tick_id: u64) -> ReceivedCommand {
        ReceivedCommand {
            command: VehicleCommand { throttle: 0.4, ..VehicleCommand::default() },
            tick_id,
            sequence,
            timestamp_ns: now_ns(),
        }
    }

    fn synchronizer(
        mode: SyncMode,
        timeout: Duration,
    ) -> (watch::Sender<Option<ReceivedCommand>>, TickSynchronizer) {
        let (tx, rx) = watch::channel(None);
        let sync = TickSynchronizer::new(mode, timeout, rx, Arc::new(BridgeMetrics::default()));
        (tx, sync)
    }

    #[tokio::test]
    async fn async_mode_returns_immediately_without_commands() {
        let (_tx, mut sync) =
            synchronizer(SyncMode::Asynchronous, Duration::from_secs(10));
        let outcome = sync.wait_for_command(&TickContext::new(1)).await;
        assert!(outcome.command.is_none());
        assert!(!outcome.timed_out);
        assert_eq!(sync.phase(), TickPhase::Complete);
    }

    #[tokio::test]
    async fn async_mode_exposes_staleness() {
        let (tx, mut sync) = synchronizer(SyncMode::Asynchronous, Duration::from_secs(10));
        tx.send(Some(received(1, 3))).unwrap();

        let outcome = sync.wait_for_command(&TickContext::new(5)).await;
        assert_eq!(outcome.staleness_ticks, Some(2));
        assert!(outcome.fresh);

        // Same command applied next tick is no longer fresh.
        let outcome = sync.wait_for_command(&TickContext::new(6)).await;
        assert_eq!(outcome.staleness_ticks, Some(3));
        assert!(!outcome.fresh);
    }

    #[tokio::test]
    async fn lockstep_accepts_command_for_current_tick() {
        let (tx, mut sync) = synchronizer(SyncMode::Lockstep, Duration::from_millis(200));

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(Some(received(1, 4))).unwrap();
            tx
        });

        let outcome = sync.wait_for_command(&TickContext::new(4)).await;
        assert_eq!(outcome.command.unwrap().tick_id, 4);
        assert!(outcome.fresh);
        assert!(!outcome.timed_out);
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn lockstep_timeout_reuses_previous_command() {
        let (tx, mut sync) = synchronizer(SyncMode::Lockstep, Duration::from_millis(30));

        tx.send(Some(received(1, 1))).unwrap();
        let first = sync.wait_for_command(&TickContext::new(1)).await;
        assert!(first.fresh);

        // No command for tick 2: hold-last kicks in within the timeout.
        let start = Instant::now();
        let second = sync.wait_for_command(&TickContext::new(2)).await;
        assert!(second.timed_out);
        assert!(!second.fresh);
        assert_eq!(second.command.unwrap().sequence, 1);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(sync.metrics.snapshot().command_timeouts, 1);
    }

    #[tokio::test]
    async fn lockstep_ignores_older_tick_commands_while_waiting() {
        let (tx, mut sync) = synchronizer(SyncMode::Lockstep, Duration::from_millis(100));

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Some(received(5, 2))).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Some(received(6, 7))).unwrap();
            tx
        });

        let outcome = sync.wait_for_command(&TickContext::new(7)).await;
        assert_eq!(outcome.command.unwrap().sequence, 6);
        assert!(!outcome.timed_out);
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn lockstep_with_no_history_times_out_empty() {
        let (_tx, mut sync) = synchronizer(SyncMode::Lockstep, Duration::from_millis(10));
        let outcome = sync.wait_for_command(&TickContext::new(1)).await;
        assert!(outcome.timed_out);
        assert!(outcome.command.is_none());
    }
}
