//! TCP control channel.
//!
//! Control frames are fixed-size, so reading one means reading exactly
//! `frame_size` bytes or until the peer stops sending.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::traits::TransportError;

/// Listener for control connections.
#[derive(Debug)]
pub struct ControlListener {
    listener: TcpListener,
    frame_size: usize,
}

impl ControlListener {
    /// Bind a control listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(addr: SocketAddr, frame_size: usize) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("TCP control channel listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            frame_size,
        })
    }

    /// Get the local address this listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next connection.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn accept(&self) -> Result<(FramedStream<TcpStream>, SocketAddr), TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(peer = %addr, "Accepted control connection");
        Ok((FramedStream::new(stream, self.frame_size), addr))
    }
}

/// A byte stream carrying fixed-size frames.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    frame_size: usize,
}

impl FramedStream<TcpStream> {
    /// Connect to a control listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: SocketAddr, frame_size: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream, frame_size))
    }
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream.
    #[must_use]
    pub fn new(stream: S, frame_size: usize) -> Self {
        Self { stream, frame_size }
    }

    /// Frame size in bytes.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Read one frame.
    ///
    /// Returns `None` if the peer closed before sending anything. A peer
    /// that closes mid-frame yields the bytes received so far; the decoder
    /// decides whether they are enough.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream reports one.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut buf = BytesMut::zeroed(self.frame_size);
        let mut filled = 0;

        while filled < self.frame_size {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf.freeze()))
    }

    /// Write one frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream reports one.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream reports one.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(256);
        let mut left = FramedStream::new(a, 16);
        let mut right = FramedStream::new(b, 16);

        left.write_frame(&[1u8; 16]).await.unwrap();
        let frame = right.read_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], &[1u8; 16]);
    }

    #[tokio::test]
    async fn test_short_frame_then_close() {
        let (a, b) = tokio::io::duplex(256);
        let mut left = FramedStream::new(a, 16);
        let mut right = FramedStream::new(b, 16);

        left.write_frame(&[9u8; 4]).await.unwrap();
        left.close().await.unwrap();

        let frame = right.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), 4);
        assert!(right.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tcp_accept_and_connect() {
        let listener = ControlListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)), 8)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = FramedStream::connect(addr, 8).await.unwrap();
            stream.write_frame(b"abcdefgh").await.unwrap();
        });

        let (mut server, _) = listener.accept().await.unwrap();
        let frame = server.read_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"abcdefgh");
        client.await.unwrap();
    }
}
