//! Error types for the chat server.

use crate::connection::SessionId;
use thiserror::Error;

/// Failures surfaced by the server itself.
///
/// Per-session I/O problems are not represented here: they are logged and
/// end that session only. These variants cover the cases a caller of the
/// library actually has to react to.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Listener creation, bind or listen failure. Fatal at startup.
    #[error("Network error: {0}")]
    Network(String),

    /// Raw I/O failure outside of a session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A session id was registered twice.
    #[error("Session {0} is already registered")]
    DuplicateSession(SessionId),
}
