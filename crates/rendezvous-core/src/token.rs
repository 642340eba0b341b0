//! Membership tokens and roles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide sequence; the only source of token uniqueness.
static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// An opaque membership token, issued by the server for one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberToken(String);

impl MemberToken {
    /// Wrap an existing token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Issue a fresh token.
    ///
    /// The sequence prefix makes tokens unique for the life of the process;
    /// the random suffix keeps them from being guessed.
    #[must_use]
    pub fn generate() -> Self {
        let seq = TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let nonce: u64 = rand::random();
        Self(format!("{seq:x}-{nonce:016x}"))
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MemberToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemberToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for MemberToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Role a membership holds in its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created the room. The room lives as long as this membership.
    Owner,
    /// Joined an existing room.
    Member,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => f.write_str("owner"),
            Role::Member => f.write_str("member"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_tokens_are_unique() {
        let tokens: HashSet<MemberToken> = (0..1000).map(|_| MemberToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_token_fits_length_field() {
        let token = MemberToken::generate();
        assert!(token.as_str().len() <= u8::MAX as usize);
        assert!(token.as_str().contains('-'));
    }

    #[test]
    fn test_token_from_string() {
        let token: MemberToken = "abc".into();
        assert_eq!(token.as_str(), "abc");
        assert_eq!(token.to_string(), "abc");
    }
}
