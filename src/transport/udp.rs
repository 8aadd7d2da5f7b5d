//! UDP datagram transport.
//!
//! The original vehicle publisher emits generic vehicle state as UDP
//! datagrams; this transport mirrors that: a `Publisher` endpoint binds an
//! ephemeral port and connects to the remote address, a `Subscriber`
//! endpoint binds the given local address and accepts datagrams from any
//! sender. Datagram boundaries give the message-oriented contract for free.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::{Role, Transport};
use crate::{BridgeError, Result};

/// Largest datagram accepted: header plus the maximum payload bound.
const RECV_BUF_SIZE: usize = 64 * 1024 + 64;

/// UDP-backed [`Transport`].
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    endpoint: SocketAddr,
    role: Role,
}

impl UdpTransport {
    /// Open a UDP endpoint for the given role.
    ///
    /// `Publisher` connects to `endpoint` (the remote consumer);
    /// `Subscriber` binds `endpoint` locally.
    pub async fn open(endpoint: SocketAddr, role: Role) -> Result<Self> {
        let socket = Self::bind(endpoint, role).await?;
        debug!(%endpoint, ?role, "UDP transport open");
        Ok(Self { socket: Some(socket), endpoint, role })
    }

    async fn bind(endpoint: SocketAddr, role: Role) -> Result<UdpSocket> {
        match role {
            Role::Publisher => {
                let local = if endpoint.is_ipv4() {
                    SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(endpoint).await?;
                Ok(socket)
            }
            Role::Subscriber => Ok(UdpSocket::bind(endpoint).await?),
        }
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or_else(|| BridgeError::transport_failed("UDP endpoint closed"))
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let sent = self.socket()?.send(bytes).await?;
        if sent != bytes.len() {
            return Err(BridgeError::transport_failed(format!(
                "short datagram send: {sent} of {} bytes",
                bytes.len()
            )));
        }
        trace!(len = bytes.len(), "datagram sent");
        Ok(())
    }

    async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let socket = self.socket()?;
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                trace!(len, %from, "datagram received");
                buf.truncate(len);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    async fn reopen(&mut self) -> Result<()> {
        self.socket = None;
        self.socket = Some(Self::bind(self.endpoint, self.role).await?);
        debug!(endpoint = %self.endpoint, role = ?self.role, "UDP transport reopened");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }
}
