//! The room registry.
//!
//! The registry owns every room and membership. Rooms live in a sharded
//! concurrent map and each public method performs its whole
//! read-modify-write under the lock of the room it touches, so checks and
//! mutations never interleave with another caller's.

use crate::room::{validate_identity, validate_room_name, Peer, Room};
use crate::token::{MemberToken, Role};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoomName(&'static str),

    /// Invalid requester identity.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(&'static str),

    /// Maximum number of rooms reached.
    #[error("Maximum number of rooms reached")]
    RoomLimitReached,

    /// Room has no free member slot.
    #[error("Room is full: {0}")]
    RoomFull(String),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// Maximum members per room, owner included.
    pub max_members_per_room: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_members_per_room: 256,
        }
    }
}

/// Result of a successful create-or-join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub token: MemberToken,
    pub role: Role,
}

/// A membership removed by [`RoomRegistry::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub token: MemberToken,
    pub identity: String,
    /// Whether the room was deleted in the same step.
    pub room_closed: bool,
}

/// A membership removed by the idle sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub room: String,
    pub token: MemberToken,
    pub identity: String,
}

/// Outcome of one idle sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Memberships removed for inactivity.
    pub evicted: Vec<Eviction>,
    /// Rooms deleted because their owner was evicted or they emptied.
    pub closed_rooms: Vec<String>,
}

impl SweepReport {
    /// Whether the sweep changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.closed_rooms.is_empty()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of memberships across all rooms.
    pub member_count: usize,
}

/// The in-memory room registry.
pub struct RoomRegistry {
    /// Rooms indexed by name.
    rooms: DashMap<String, Room>,
    /// Room count kept outside the map so it can be read under a shard lock.
    room_count: AtomicUsize,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            room_count: AtomicUsize::new(0),
            config,
        }
    }

    /// Create `room` with the requester as owner, or join it as a member.
    ///
    /// A room whose owner membership is gone is replaced by a fresh room
    /// owned by the requester.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name or identity is invalid, or a limit
    /// is reached.
    pub fn create_or_join(&self, room: &str, identity: &str) -> Result<Admission, RegistryError> {
        validate_room_name(room).map_err(RegistryError::InvalidRoomName)?;
        validate_identity(identity).map_err(RegistryError::InvalidIdentity)?;

        match self.rooms.entry(room.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_valid() {
                    if entry.get().member_count() >= self.config.max_members_per_room {
                        return Err(RegistryError::RoomFull(room.to_string()));
                    }
                    let token = entry.get_mut().join(identity);
                    Ok(Admission {
                        token,
                        role: Role::Member,
                    })
                } else {
                    warn!(room = %room, "Replacing orphaned room");
                    let (fresh, token) = Room::create(room, identity);
                    entry.insert(fresh);
                    Ok(Admission {
                        token,
                        role: Role::Owner,
                    })
                }
            }
            Entry::Vacant(entry) => {
                if self.room_count.fetch_add(1, Ordering::SeqCst) >= self.config.max_rooms {
                    self.room_count.fetch_sub(1, Ordering::SeqCst);
                    return Err(RegistryError::RoomLimitReached);
                }
                let (fresh, token) = Room::create(room, identity);
                entry.insert(fresh);
                debug!(room = %room, token = %token, "Created room");
                Ok(Admission {
                    token,
                    role: Role::Owner,
                })
            }
        }
    }

    /// Refresh a membership and record the address it was last seen from.
    ///
    /// Returns `false`, without changing anything, if the room is not valid
    /// or the token has no membership in it.
    pub fn touch(&self, room: &str, token: &str, addr: SocketAddr) -> bool {
        self.rooms
            .get_mut(room)
            .map(|mut r| r.touch(token, addr, Instant::now()))
            .unwrap_or(false)
    }

    /// Check that a room exists and its owner is present.
    #[must_use]
    pub fn is_valid_room(&self, room: &str) -> bool {
        self.rooms.get(room).is_some_and(|r| r.is_valid())
    }

    /// Check that a token has a membership in a valid room.
    #[must_use]
    pub fn validate_token(&self, room: &str, token: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|r| r.is_valid() && r.contains(token))
    }

    /// Remove a membership.
    ///
    /// If the token was the owner's, or the room is left empty, the room is
    /// deleted in the same step. Returns `None` if there was no such
    /// membership.
    pub fn leave(&self, room: &str, token: &str) -> Option<Departure> {
        let Entry::Occupied(mut entry) = self.rooms.entry(room.to_string()) else {
            return None;
        };

        let membership = entry.get_mut().remove(token)?;
        let room_closed = entry.get().should_close();
        if room_closed {
            entry.remove();
            self.room_count.fetch_sub(1, Ordering::SeqCst);
            debug!(room = %room, "Deleted room");
        }

        Some(Departure {
            token: MemberToken::new(token),
            identity: membership.identity,
            room_closed,
        })
    }

    /// Every other current member of a valid room, in join order.
    #[must_use]
    pub fn snapshot(&self, room: &str, caller: &str) -> Vec<Peer> {
        self.rooms
            .get(room)
            .filter(|r| r.is_valid())
            .map(|r| r.peers(caller))
            .unwrap_or_default()
    }

    /// Identity a member gave when joining.
    #[must_use]
    pub fn identity_of(&self, room: &str, token: &str) -> Option<String> {
        self.rooms
            .get(room)
            .and_then(|r| r.get(token).map(|m| m.identity.clone()))
    }

    /// Remove every membership idle longer than `timeout`.
    ///
    /// Each room is decided under its own lock; rooms that lose their owner
    /// or every member are deleted.
    pub fn evict_idle(&self, timeout: Duration) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();

        self.rooms.retain(|name, room| {
            for (token, membership) in room.evict_idle(now, timeout) {
                report.evicted.push(Eviction {
                    room: name.clone(),
                    token,
                    identity: membership.identity,
                });
            }
            if room.should_close() {
                self.room_count.fetch_sub(1, Ordering::SeqCst);
                report.closed_rooms.push(name.clone());
                false
            } else {
                true
            }
        });

        report
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.room_count.load(Ordering::SeqCst),
            member_count: self.rooms.iter().map(|r| r.member_count()).sum(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
