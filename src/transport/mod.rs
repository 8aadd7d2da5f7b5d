//! Message-oriented transport abstraction.
//!
//! The autonomy stack's socket library is hidden behind the [`Transport`]
//! trait: one send corresponds to exactly one receivable unit on the peer
//! side, and receives never block past their timeout. Any pub/sub library or
//! raw socket can be slotted in by implementing the trait; the crate ships a
//! UDP datagram transport and an in-process memory transport.

use std::time::Duration;

use crate::Result;

mod memory;
mod udp;

pub use memory::{MemoryFault, MemoryTransport};
pub use udp::UdpTransport;

/// Direction a transport endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Fire-and-forget outbound (state frames).
    Publisher,
    /// Inbound (command frames).
    Subscriber,
}

/// Message-oriented transport endpoint.
///
/// Implementations own their socket handle exclusively; the tick thread
/// never touches a transport directly, only the session's bounded queues.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Send one message. Errors indicate transport-level failure and put the
    /// session into reconnect.
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive one message, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing to read.
    /// Designed to be polled once per tick, never used as a blocking read.
    async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Tear down and re-establish the underlying endpoint after a failure.
    async fn reopen(&mut self) -> Result<()>;

    /// Close the endpoint. Further operations fail.
    async fn close(&mut self) -> Result<()>;
}
