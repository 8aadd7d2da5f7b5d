//! Real-time bridge between a vehicle simulator and an autonomy stack.
//!
//! Simbridge connects a fixed-tick vehicle simulation to an external
//! autonomous-driving stack over a compact, versioned binary protocol.
//! State snapshots flow out once per tick; vehicle commands flow back and
//! are validated before the simulation applies them.
//!
//! # Features
//!
//! - **Bounded latency**: capacity-one queues everywhere, latest-wins under
//!   load, constant memory no matter how long the peer is away
//! - **Two sync modes**: lockstep (bounded wait per tick) or asynchronous
//!   (never wait, apply the freshest command)
//! - **Self-healing transport**: reconnect with exponential backoff,
//!   sequence continuity across reconnects, heartbeat-based liveness
//! - **Corruption-safe framing**: magic, version, length, and CRC-32
//!   checks; a bad frame is counted and discarded, never fatal
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use simbridge::{Bridge, BridgeConfig, StateSnapshot, TickContext};
//!
//! #[tokio::main]
//! async fn main() -> simbridge::Result<()> {
//!     let config = BridgeConfig {
//!         state_endpoint: Some("10.0.0.5:7077".parse().unwrap()),
//!         command_endpoint: Some("0.0.0.0:7078".parse().unwrap()),
//!         ..BridgeConfig::default()
//!     };
//!     let mut bridge = Bridge::connect_udp(config).await?;
//!
//!     for tick in 0.. {
//!         let snapshot = StateSnapshot::default(); // from the simulation
//!         if let Some(accepted) = bridge.run_tick(snapshot, TickContext::new(tick)).await? {
//!             // apply accepted.command to the vehicle
//!             let _ = accepted.command.steer;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
pub mod metrics;

// Tick-loop architecture
mod bridge;
mod dispatch;
mod publisher;
mod session;
pub mod stream;
mod sync;

// Transports
pub mod transport;

// Core exports
pub use codec::{
    DecodeError, DriveMode, Frame, FrameKind, FramePayload, GearState, PROTOCOL_VERSION,
    StateSnapshot, VehicleCommand, Vector3, WheelState,
};
pub use config::{BridgeConfig, SyncMode};
pub use error::{BridgeError, Result};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

// Main API exports
pub use bridge::Bridge;
pub use dispatch::{
    AcceptedCommand, CommandLimits, CommandObserver, RejectReason, RejectedCommand,
};
pub use session::{ReceivedCommand, SessionState};
pub use sync::TickContext;
pub use transport::{MemoryFault, MemoryTransport, Role, Transport, UdpTransport};
