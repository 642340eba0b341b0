//! Transport abstraction traits for Rendezvous.
//!
//! The data-plane dispatcher only needs to push bytes at an address; it does
//! so through [`DatagramSink`] so the relay logic does not depend on a bound
//! socket.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to send data.
    #[error("Send to {addr} failed: {reason}")]
    SendFailed { addr: SocketAddr, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can deliver one datagram to an address.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Send `frame` to `addr` as a single datagram.
    async fn send_to(&self, frame: Bytes, addr: SocketAddr) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failed_display() {
        let err = TransportError::SendFailed {
            addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            reason: "refused".to_string(),
        };
        assert_eq!(err.to_string(), "Send to 127.0.0.1:9001 failed: refused");
    }
}
