//! In-process paired transport.
//!
//! Two cross-connected endpoints backed by bounded channels. Used by the
//! integration tests to stand in for a real autonomy stack, and usable for
//! embedding a consumer in the same process. A [`MemoryFault`] handle lets
//! tests inject send failures to exercise the reconnect path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use super::Transport;
use crate::{BridgeError, Result};

/// Depth of each direction's channel. Deliberately small: the bridge's
/// freshness-over-completeness policy lives above the transport, so the
/// transport itself only needs enough slack to decouple the two sides.
const CHANNEL_DEPTH: usize = 16;

/// Shared fault-injection switch for a [`MemoryTransport`].
#[derive(Debug, Clone, Default)]
pub struct MemoryFault {
    failing: Arc<AtomicBool>,
}

impl MemoryFault {
    /// While set, every `send` on the associated endpoint fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

/// One endpoint of an in-process transport pair.
pub struct MemoryTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    fault: MemoryFault,
    closed: bool,
}

impl MemoryTransport {
    /// Create a cross-connected pair: bytes sent on one endpoint are
    /// received on the other.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
        (Self::endpoint(a_tx, a_rx), Self::endpoint(b_tx, b_rx))
    }

    fn endpoint(tx: mpsc::Sender<Vec<u8>>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { tx, rx, fault: MemoryFault::default(), closed: false }
    }

    /// Handle for injecting send failures on this endpoint.
    pub fn fault_handle(&self) -> MemoryFault {
        self.fault.clone()
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(BridgeError::transport_failed("memory endpoint closed"));
        }
        if self.fault.is_failing() {
            return Err(BridgeError::transport_failed("injected send failure"));
        }
        self.tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| BridgeError::transport_failed("peer endpoint dropped"))
    }

    async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(BridgeError::transport_failed("memory endpoint closed"));
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            // Peer gone: report as a transport failure so the session
            // degrades instead of spinning on empty reads.
            Ok(None) => Err(BridgeError::transport_failed("peer endpoint dropped")),
            Err(_) => Ok(None),
        }
    }

    async fn reopen(&mut self) -> Result<()> {
        if self.closed {
            return Err(BridgeError::transport_failed("memory endpoint closed"));
        }
        // The channel itself has nothing to re-establish, but a still-active
        // fault means the simulated link is still down.
        if self.fault.is_failing() {
            return Err(BridgeError::transport_failed("injected reopen failure"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
