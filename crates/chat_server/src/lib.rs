//! # Chat Server
//!
//! A multi-client chat broadcast server over a line-oriented text protocol.
//! Every participant connects over TCP, picks a display name and from then on
//! each line it sends is either a slash command, answered privately, or a chat
//! message relayed to everyone else.
//!
//! ## Architecture Overview
//!
//! * **Session** ([`Session`]) - Identity and the write half of one client's
//!   transport. Sends never raise; a failed send reports `false`.
//! * **Registry** ([`Registry`]) - The set of live sessions, safe under
//!   concurrent add/remove, iterated through point-in-time snapshots.
//! * **Broadcaster** ([`Broadcaster`]) - Fans a line out to all sessions but
//!   the sender and evicts any recipient whose write fails or times out.
//! * **Command interpreter** ([`messaging::commands`]) - `/help`, `/users`,
//!   `/time`; replies go to the issuing session only.
//! * **Connection supervisor** ([`ChatServer`]) - Accept loop spawning one
//!   handling unit per connection, and the shutdown sequence.
//!
//! ### Message Flow
//!
//! 1. The accept loop creates a [`Session`] and registers it
//! 2. The handling unit prompts for a name and announces the join
//! 3. Each line read is a quit, a command or a chat message
//! 4. On quit, end of stream, I/O failure, eviction or shutdown the session
//!    is deregistered, its departure announced and its transport closed
//!
//! ## Error Handling
//!
//! Failures never cross session boundaries. Per-session I/O errors end that
//! session only; accept errors are logged and the loop continues. Only a
//! bind failure ([`ServerError::Network`]) stops the server from starting.
//!
//! ## Example
//!
//! ```no_run
//! use chat_server::{ChatServer, ServerConfig};
//!
//! # async fn run() -> Result<(), chat_server::ServerError> {
//! let server = ChatServer::new(ServerConfig::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub use config::ServerConfig;
pub use connection::{Registry, Session, SessionId};
pub use error::ServerError;
pub use messaging::{BroadcastMessage, BroadcastReport, Broadcaster, Command};
pub use server::{ChatServer, DisconnectReason};

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod protocol;
pub mod server;
