//! Command validation and delivery.
//!
//! Every inbound command passes through the dispatcher exactly once before
//! the simulation sees it. The dispatcher enforces the configured actuation
//! ranges and tick monotonicity, and notifies an observer of the verdict so
//! hosts can surface rejected commands without polling metrics.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::codec::VehicleCommand;
use crate::metrics::BridgeMetrics;
use crate::session::ReceivedCommand;
use crate::{BridgeError, Result};

/// Actuation ranges a command must respect to be dispatched.
///
/// Defaults match normalized actuator conventions: steering effort in
/// `[-1, 1]`, throttle and brake in `[0, 1]`. Target speed has no upper
/// limit by default; negative values are clamped to zero at acceptance
/// rather than rejected, since reverse intent is carried by the gear.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandLimits {
    #[serde(default = "default_steer_limit")]
    pub max_steer: f32,
    #[serde(default = "default_effort_limit")]
    pub max_throttle: f32,
    #[serde(default = "default_effort_limit")]
    pub max_brake: f32,
    /// Optional ceiling on the commanded target speed, m/s.
    #[serde(default)]
    pub max_target_speed: Option<f32>,
}

fn default_steer_limit() -> f32 {
    1.0
}

fn default_effort_limit() -> f32 {
    1.0
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            max_steer: default_steer_limit(),
            max_throttle: default_effort_limit(),
            max_brake: default_effort_limit(),
            max_target_speed: None,
        }
    }
}

impl CommandLimits {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_steer", self.max_steer),
            ("max_throttle", self.max_throttle),
            ("max_brake", self.max_brake),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(BridgeError::invalid_config(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        if let Some(cap) = self.max_target_speed
            && (!(cap > 0.0) || !cap.is_finite())
        {
            return Err(BridgeError::invalid_config(format!(
                "max_target_speed must be finite and positive, got {cap}"
            )));
        }
        Ok(())
    }
}

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// A field fell outside the configured range, or was not a number.
    RangeViolation { field: &'static str, value: f32 },
    /// The command targets an older tick than one already accepted.
    StaleCommand { tick_id: u64, last_accepted: u64 },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RangeViolation { field, value } => {
                write!(f, "{field} out of range: {value}")
            }
            Self::StaleCommand { tick_id, last_accepted } => {
                write!(f, "stale command for tick {tick_id}, already accepted tick {last_accepted}")
            }
        }
    }
}

/// A command the dispatcher refused, with the original intact for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCommand {
    pub received: ReceivedCommand,
    pub reason: RejectReason,
}

/// A validated command ready for the simulation to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedCommand {
    pub command: VehicleCommand,
    pub tick_id: u64,
    pub sequence: u64,
}

/// Hook invoked on every dispatch verdict.
///
/// The default observer logs rejections; hosts that need to mirror
/// commands into their own telemetry implement this instead.
pub trait CommandObserver: Send + Sync {
    fn accepted(&self, command: &AcceptedCommand) {
        debug!(tick_id = command.tick_id, sequence = command.sequence, "command accepted");
    }

    fn rejected(&self, rejected: &RejectedCommand) {
        warn!(
            tick_id = rejected.received.tick_id,
            sequence = rejected.received.sequence,
            reason = %rejected.reason,
            "command rejected"
        );
    }
}

struct LogObserver;

impl CommandObserver for LogObserver {}

pub(crate) struct CommandDispatcher {
    limits: CommandLimits,
    observer: Box<dyn CommandObserver>,
    last_accepted_tick: Option<u64>,
    metrics: Arc<BridgeMetrics>,
}

impl CommandDispatcher {
    pub(crate) fn new(limits: CommandLimits, metrics: Arc<BridgeMetrics>) -> Self {
        Self { limits, observer: Box::new(LogObserver), last_accepted_tick: None, metrics }
    }

    pub(crate) fn set_observer(&mut self, observer: Box<dyn CommandObserver>) {
        self.observer = observer;
    }

    /// Validate one received command. Accepted commands advance the tick
    /// watermark; rejected ones leave all dispatcher state untouched.
    pub(crate) fn dispatch(
        &mut self,
        received: ReceivedCommand,
    ) -> std::result::Result<AcceptedCommand, RejectedCommand> {
        if let Some(reason) = self.check(&received) {
            BridgeMetrics::incr(&self.metrics.commands_rejected);
            let rejected = RejectedCommand { received, reason };
            self.observer.rejected(&rejected);
            return Err(rejected);
        }

        let mut command = received.command;
        // Negative target speed carries no meaning the gear doesn't already
        // express; clamp instead of rejecting.
        if command.target_speed < 0.0 {
            command.target_speed = 0.0;
        }

        self.last_accepted_tick = Some(received.tick_id);
        BridgeMetrics::incr(&self.metrics.commands_accepted);
        let accepted = AcceptedCommand {
            command,
            tick_id: received.tick_id,
            sequence: received.sequence,
        };
        self.observer.accepted(&accepted);
        Ok(accepted)
    }

    fn check(&self, received: &ReceivedCommand) -> Option<RejectReason> {
        let cmd = &received.command;

        // `!(..)` comparisons so NaN fails every range check.
        if !(cmd.steer.abs() <= self.limits.max_steer) {
            return Some(RejectReason::RangeViolation { field: "steer", value: cmd.steer });
        }
        if !(cmd.throttle >= 0.0 && cmd.throttle <= self.limits.max_throttle) {
            return Some(RejectReason::RangeViolation { field: "throttle", value: cmd.throttle });
        }
        if !(cmd.brake >= 0.0 && cmd.brake <= self.limits.max_brake) {
            return Some(RejectReason::RangeViolation { field: "brake", value: cmd.brake });
        }
        if !cmd.target_speed.is_finite() {
            return Some(RejectReason::RangeViolation {
                field: "target_speed",
                value: cmd.target_speed,
            });
        }
        if let Some(cap) = self.limits.max_target_speed
            && cmd.target_speed > cap
        {
            return Some(RejectReason::RangeViolation {
                field: "target_speed",
                value: cmd.target_speed,
            });
        }

        if let Some(last) = self.last_accepted_tick
            && received.tick_id < last
        {
            return Some(RejectReason::StaleCommand {
                tick_id: received.tick_id,
                last_accepted: last,
            });
        }

        None
    }
}
