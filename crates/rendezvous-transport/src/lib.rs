//! # rendezvous-transport
//!
//! Transport layer for the Rendezvous relay.
//!
//! - **TCP** - control channel, fixed-size frames over a byte stream
//! - **UDP** - data channel, one fixed-size frame per datagram
//!
//! The dispatcher sends through the [`DatagramSink`] trait so tests can swap
//! in a sink that records or fails deliveries.
//!
//! ```rust,ignore
//! use rendezvous_transport::{DatagramSink, UdpChannel};
//!
//! let channel = UdpChannel::bind(addr, 4096).await?;
//! loop {
//!     let (frame, peer) = channel.recv().await?;
//!     channel.send_to(frame, peer).await?;
//! }
//! ```

pub mod tcp;
pub mod traits;
pub mod udp;

pub use tcp::{ControlListener, FramedStream};
pub use traits::{DatagramSink, TransportError};
pub use udp::UdpChannel;
