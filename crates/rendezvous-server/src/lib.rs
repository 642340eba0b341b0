//! # rendezvous-server
//!
//! The Rendezvous server and its client.
//!
//! - [`control`] - create/join handshake on the TCP control channel
//! - [`dispatch`] - datagram validation and fan-out on the UDP data channel
//! - [`server`] - socket binding, serving loops and the liveness sweeper
//! - [`client`] - a room member speaking both channels
//!
//! ```rust,ignore
//! use rendezvous_server::{Config, Server};
//!
//! let server = Server::bind(Config::load(None)?).await?;
//! server.run().await?;
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod metrics;
pub mod server;

pub use client::{ClientError, Incoming, RoomClient};
pub use config::Config;
pub use control::{Admitted, ControlError, ControlSession};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use server::Server;
