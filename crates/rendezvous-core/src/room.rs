//! Room and membership state.
//!
//! A [`Room`] is plain data; all locking happens in the registry that owns it.

use crate::token::MemberToken;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Maximum room name length in bytes (single-byte length field on the wire).
pub const MAX_ROOM_NAME_LENGTH: usize = 255;

/// Maximum identity length in bytes.
pub const MAX_IDENTITY_LENGTH: usize = 255;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

/// Validate a requester identity.
///
/// # Errors
///
/// Returns an error message if the identity is invalid.
pub fn validate_identity(identity: &str) -> Result<(), &'static str> {
    if identity.is_empty() {
        return Err("Identity cannot be empty");
    }
    if identity.len() > MAX_IDENTITY_LENGTH {
        return Err("Identity too long");
    }
    Ok(())
}

/// One member's state inside a room.
#[derive(Debug, Clone)]
pub struct Membership {
    /// Identity given by the requester at join time.
    pub identity: String,
    /// Data-channel address, known once the member has sent a datagram.
    pub addr: Option<SocketAddr>,
    /// Join order within the room.
    pub joined_seq: u64,
    /// Last activity.
    pub last_seen: Instant,
}

impl Membership {
    fn new(identity: impl Into<String>, joined_seq: u64) -> Self {
        Self {
            identity: identity.into(),
            addr: None,
            joined_seq,
            last_seen: Instant::now(),
        }
    }

    /// Check if this membership has been idle longer than `timeout` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Another member of a room, as seen from a fan-out snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub token: MemberToken,
    pub identity: String,
    pub addr: Option<SocketAddr>,
}

/// A chat room.
#[derive(Debug)]
pub struct Room {
    name: String,
    owner: MemberToken,
    members: HashMap<MemberToken, Membership>,
    next_seq: u64,
}

impl Room {
    /// Create a room owned by `identity`, returning the owner's token.
    #[must_use]
    pub fn create(name: impl Into<String>, identity: impl Into<String>) -> (Self, MemberToken) {
        let owner = MemberToken::generate();
        let mut members = HashMap::new();
        members.insert(owner.clone(), Membership::new(identity, 0));
        let room = Self {
            name: name.into(),
            owner: owner.clone(),
            members,
            next_seq: 1,
        };
        (room, owner)
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the owner's token.
    #[must_use]
    pub fn owner(&self) -> &MemberToken {
        &self.owner
    }

    /// A room is valid while its owner's membership is present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.members.contains_key(&self.owner)
    }

    /// Whether the room must be deleted.
    #[must_use]
    pub fn should_close(&self) -> bool {
        !self.is_valid() || self.members.is_empty()
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a token has a membership here.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.members.contains_key(token)
    }

    /// Get a member's state.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&Membership> {
        self.members.get(token)
    }

    /// Add a member, returning the new token.
    pub fn join(&mut self, identity: impl Into<String>) -> MemberToken {
        let mut token = MemberToken::generate();
        while self.members.contains_key(&token) {
            token = MemberToken::generate();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.members
            .insert(token.clone(), Membership::new(identity, seq));
        debug!(room = %self.name, token = %token, members = self.members.len(), "Member joined");
        token
    }

    /// Refresh a member's liveness and record its current address.
    ///
    /// Returns `false` if the room is not valid or the token is unknown.
    pub fn touch(&mut self, token: &str, addr: SocketAddr, now: Instant) -> bool {
        if !self.is_valid() {
            return false;
        }
        match self.members.get_mut(token) {
            Some(member) => {
                member.last_seen = now;
                member.addr = Some(addr);
                true
            }
            None => false,
        }
    }

    /// Remove a member.
    pub fn remove(&mut self, token: &str) -> Option<Membership> {
        let removed = self.members.remove(token);
        if removed.is_some() {
            debug!(room = %self.name, token = %token, "Member removed");
        }
        removed
    }

    /// Remove every member idle longer than `timeout`.
    ///
    /// Returns the removed memberships.
    pub fn evict_idle(&mut self, now: Instant, timeout: Duration) -> Vec<(MemberToken, Membership)> {
        let stale: Vec<MemberToken> = self
            .members
            .iter()
            .filter(|(_, m)| m.is_stale(now, timeout))
            .map(|(t, _)| t.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|token| self.members.remove(&token).map(|m| (token, m)))
            .collect()
    }

    /// Every member except `exclude`, in join order.
    #[must_use]
    pub fn peers(&self, exclude: &str) -> Vec<Peer> {
        let mut others: Vec<(&MemberToken, &Membership)> = self
            .members
            .iter()
            .filter(|(t, _)| t.as_str() != exclude)
            .collect();
        others.sort_by_key(|(_, m)| m.joined_seq);
        others
            .into_iter()
            .map(|(t, m)| Peer {
                token: t.clone(),
                identity: m.identity.clone(),
                addr: m.addr,
            })
            .collect()
    }
}
