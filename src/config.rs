//! Bridge configuration.
//!
//! Endpoint addresses, protocol version, synchronization mode, and timing
//! knobs are supplied by configuration external to this crate; everything
//! here derives `Deserialize` so hosts can load it from whatever format
//! they already use.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::PROTOCOL_VERSION;
use crate::dispatch::CommandLimits;
use crate::{BridgeError, Result};

/// Tick synchronization mode. Fixed for the session's lifetime; switching
/// modes mid-session would complicate the ordering guarantees for no
/// identified need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Each tick waits (bounded) for a command for the current tick;
    /// on timeout the previous command is reused.
    Lockstep,
    /// Ticks never wait; the most recently received command is applied and
    /// a staleness metric is exposed.
    #[default]
    Asynchronous,
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Remote address state frames are published to. Unused when the host
    /// supplies its own transports.
    #[serde(default)]
    pub state_endpoint: Option<SocketAddr>,

    /// Local address command frames are received on. Unused when the host
    /// supplies its own transports.
    #[serde(default)]
    pub command_endpoint: Option<SocketAddr>,

    /// Protocol version offered in the handshake; defaults to the version
    /// this crate speaks.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,

    #[serde(default)]
    pub mode: SyncMode,

    /// Lockstep wait for a command after publish, per tick.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Bound on the Hello/HelloAck exchange at startup.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Outbound heartbeat cadence.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Peer considered alive if anything arrived within this window.
    #[serde(default = "default_liveness_window_ms")]
    pub liveness_window_ms: u64,

    #[serde(default)]
    pub limits: CommandLimits,
}

fn default_protocol_version() -> u16 {
    PROTOCOL_VERSION
}

fn default_command_timeout_ms() -> u64 {
    20
}

fn default_handshake_timeout_ms() -> u64 {
    3_000
}

fn default_heartbeat_interval_ms() -> u64 {
    100
}

// The original driver treats the control link as dead after 500ms of
// silence; same default here.
fn default_liveness_window_ms() -> u64 {
    500
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            state_endpoint: None,
            command_endpoint: None,
            protocol_version: default_protocol_version(),
            mode: SyncMode::default(),
            command_timeout_ms: default_command_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_window_ms: default_liveness_window_ms(),
            limits: CommandLimits::default(),
        }
    }
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(BridgeError::invalid_config("command_timeout_ms must be non-zero"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(BridgeError::invalid_config("handshake_timeout_ms must be non-zero"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(BridgeError::invalid_config("heartbeat_interval_ms must be non-zero"));
        }
        self.limits.validate()?;
        Ok(())
    }

    /// Both endpoints, required when opening UDP transports from config.
    pub(crate) fn endpoints(&self) -> Result<(SocketAddr, SocketAddr)> {
        match (self.state_endpoint, self.command_endpoint) {
            (Some(state), Some(command)) => Ok((state, command)),
            _ => Err(BridgeError::invalid_config(
                "state_endpoint and command_endpoint are required for UDP transports",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.mode, SyncMode::Asynchronous);
        assert_eq!(config.liveness_window(), Duration::from_millis(500));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = BridgeConfig { command_timeout_ms: 0, ..BridgeConfig::default() };
        assert!(matches!(config.validate(), Err(BridgeError::Config { .. })));
    }

    #[test]
    fn endpoints_required_for_udp() {
        let config = BridgeConfig::default();
        assert!(config.endpoints().is_err());

        let config = BridgeConfig {
            state_endpoint: Some("127.0.0.1:7077".parse().unwrap()),
            command_endpoint: Some("127.0.0.1:7078".parse().unwrap()),
            ..BridgeConfig::default()
        };
        assert!(config.endpoints().is_ok());
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{"state_endpoint":"127.0.0.1:7077","command_endpoint":"0.0.0.0:7078","mode":"lockstep"}"#,
        )
        .unwrap();
        assert_eq!(config.mode, SyncMode::Lockstep);
        assert_eq!(config.command_timeout_ms, 20);
    }
}
