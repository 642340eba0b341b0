//! UDP data channel.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::traits::{DatagramSink, TransportError};

/// A bound UDP socket exchanging one frame per datagram.
///
/// Cloning is cheap; clones share the socket.
#[derive(Debug, Clone)]
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    frame_size: usize,
}

impl UdpChannel {
    /// Bind a UDP channel.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(addr: SocketAddr, frame_size: usize) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let channel = Self {
            socket: Arc::new(socket),
            frame_size,
        };
        info!("UDP data channel listening on {}", channel.local_addr()?);
        Ok(channel)
    }

    /// Get the local address this channel is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive the next datagram.
    ///
    /// Datagrams longer than the frame size are cut to the frame size.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket reports one.
    pub async fn recv(&self) -> Result<(Bytes, SocketAddr), TransportError> {
        let mut buf = vec![0u8; self.frame_size];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        trace!(peer = %addr, bytes = len, "Received datagram");
        Ok((Bytes::from(buf), addr))
    }
}

#[async_trait]
impl DatagramSink for UdpChannel {
    async fn send_to(&self, frame: Bytes, addr: SocketAddr) -> Result<(), TransportError> {
        self.socket
            .send_to(&frame, addr)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed {
                addr,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_udp_send_and_recv() {
        let a = UdpChannel::bind(loopback(), 64).await.unwrap();
        let b = UdpChannel::bind(loopback(), 64).await.unwrap();

        a.send_to(Bytes::from_static(b"hello"), b.local_addr().unwrap())
            .await
            .unwrap();

        let (data, from) = b.recv().await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_udp_recv_cuts_to_frame_size() {
        let a = UdpChannel::bind(loopback(), 64).await.unwrap();
        let b = UdpChannel::bind(loopback(), 8).await.unwrap();

        a.send_to(Bytes::from(vec![7u8; 32]), b.local_addr().unwrap())
            .await
            .unwrap();

        let (data, _) = b.recv().await.unwrap();
        assert_eq!(data.len(), 8);
    }
}
