//! # rendezvous-core
//!
//! Room registry and membership lifecycle for the Rendezvous relay.
//!
//! This crate provides the state shared by every handler:
//!
//! - **Token** - Opaque, process-unique membership tokens
//! - **Room** - Owner, members, last activity and data-channel addresses
//! - **Registry** - Atomic create/join, touch, leave and snapshot operations
//! - **Sweeper** - Periodic eviction of idle memberships
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  create_or_join   ┌──────────────┐
//! │   Control    │──────────────────▶│              │
//! └──────────────┘                   │              │
//! ┌──────────────┐  touch/snapshot   │   Registry   │
//! │  Dispatcher  │──────────────────▶│              │
//! └──────────────┘                   │              │
//! ┌──────────────┐   evict_idle      │              │
//! │   Sweeper    │──────────────────▶│              │
//! └──────────────┘                   └──────────────┘
//! ```

pub mod registry;
pub mod room;
pub mod sweeper;
pub mod token;

pub use registry::{
    Admission, Departure, Eviction, RegistryConfig, RegistryError, RegistryStats, RoomRegistry,
    SweepReport,
};
pub use room::{Peer, Room};
pub use sweeper::{Sweeper, SweeperConfig};
pub use token::{MemberToken, Role};
