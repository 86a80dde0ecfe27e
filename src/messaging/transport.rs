use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::trace;

/// The receive buffer size. Datagrams filling the buffer completely are treated as truncated.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Datagram transport the node driver runs on. There is a single socket per node, used both for
///  sending and receiving.
#[async_trait::async_trait]
pub trait Transport : Sync + Send {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;

    /// resolves when the transport can accept an outgoing datagram
    async fn writable(&self) -> anyhow::Result<()>;

    fn local_addr(&self) -> anyhow::Result<SocketAddr>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}
impl UdpTransport {
    pub async fn bind(self_addr: SocketAddr) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(self_addr).await?;
        trace!("bound UDP socket to {:?}", socket.local_addr()?);
        Ok(UdpTransport {
            socket,
        })
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        self.socket.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    async fn writable(&self) -> anyhow::Result<()> {
        Ok(self.socket.writable().await?)
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
