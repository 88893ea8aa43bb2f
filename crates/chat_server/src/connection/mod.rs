//! Connection management for chat participants.
//!
//! This module holds the per-connection [`Session`] state and the
//! [`Registry`] of sessions that are currently live.

pub mod registry;
pub mod session;

pub use registry::Registry;
pub use session::Session;

use uuid::Uuid;

/// Unique identifier for a session.
///
/// Assigned when the connection is accepted and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
