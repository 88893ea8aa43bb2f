//! Server configuration types and defaults.
//!
//! This module contains the configuration structure used to initialize and
//! tune the chat server: where it listens, how many participants it accepts,
//! and how long it waits on slow peers and on shutdown.

use std::net::SocketAddr;
use std::time::Duration;

/// Port the chat server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 12345;

/// Configuration structure for the chat server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the listener to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrently registered sessions
    pub max_connections: usize,

    /// Upper bound on a single write to one client.
    ///
    /// A write that does not complete in time counts as a failed send and
    /// the recipient is evicted.
    pub write_timeout: Duration,

    /// How long shutdown waits for handling units to finish their own
    /// teardown before aborting the rest
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            max_connections: 1000,
            write_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
