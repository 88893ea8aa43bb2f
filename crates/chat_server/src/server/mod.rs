//! Connection supervision: the accept loop, per-connection handling units
//! and the shutdown sequence.

pub mod core;
pub mod handlers;

pub use self::core::ChatServer;
pub use handlers::DisconnectReason;
