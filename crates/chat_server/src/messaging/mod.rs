//! Message handling: fan-out to sessions and command interpretation.

pub mod broadcast;
pub mod commands;

pub use broadcast::{BroadcastMessage, BroadcastReport, Broadcaster};
pub use commands::Command;
