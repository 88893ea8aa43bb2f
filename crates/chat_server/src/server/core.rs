//! Core chat server implementation.
//!
//! This module contains the main `ChatServer` struct: it owns the listener,
//! the registry of live sessions and the shutdown signal, runs the accept
//! loop and drains the handling units when the server stops.

use crate::{
    config::ServerConfig,
    connection::Registry,
    error::ServerError,
    messaging::Broadcaster,
    server::handlers::{handle_connection, shutdown_requested, ConnectionContext},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so resource exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listen backlog passed to the socket.
const LISTEN_BACKLOG: i32 = 1024;

/// The chat server.
///
/// `ChatServer` owns the listening endpoint, the [`Registry`] and the
/// [`Broadcaster`] shared by all handling units, and the shutdown signal.
/// It is a plain value: create as many independent instances as needed.
///
/// # Lifecycle
///
/// * [`ChatServer::bind`] creates the listener (bind failure is fatal)
/// * [`ChatServer::serve`] runs the accept loop until shutdown
/// * [`ChatServer::shutdown`] may be called from any task at any time
pub struct ChatServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Sessions currently connected
    registry: Arc<Registry>,

    /// Fan-out over the registry
    broadcaster: Broadcaster,

    /// Set to `true` once shutdown has been requested
    shutdown_sender: watch::Sender<bool>,
}

impl ChatServer {
    /// Creates a new chat server with the specified configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (shutdown_sender, _) = watch::channel(false);

        Self {
            config,
            registry,
            broadcaster,
            shutdown_sender,
        }
    }

    /// Binds the configured address and returns the listener.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Network` if the socket cannot be created, bound
    /// or put into listening mode.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR: {}", e);
        }

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind to {address} failed: {e}")))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;

        info!("✅ Listener bound on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Binds and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting chat server on {}", self.config.bind_address);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Runs the accept loop on `listener` until shutdown is requested, then
    /// drains every handling unit.
    ///
    /// Accept errors are logged and the loop keeps going. When this returns
    /// the listener is closed and the registry is empty.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown_receiver) => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
                        }
                        let (reader, writer) = stream.into_split();
                        let ctx = self.connection_context();
                        handlers.spawn(handle_connection(reader, writer, remote_addr, ctx));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    log_handler_exit(finished);
                }
            }
        }

        // Stop accepting before anything else.
        drop(listener);
        info!("🧹 Listener closed, draining {} handling unit(s)", handlers.len());

        let drain = async {
            while let Some(finished) = handlers.join_next().await {
                log_handler_exit(finished);
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
            warn!(
                "{} handling unit(s) still running after {:?}, aborting",
                handlers.len(),
                self.config.shutdown_timeout
            );
            handlers.shutdown().await;
        }

        for session in self.registry.drain() {
            session.close().await;
        }

        info!("Server stopped");
        Ok(())
    }

    /// Requests shutdown. Safe to call repeatedly, before `serve` starts,
    /// and with any number of connected sessions.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        self.shutdown_sender.send_replace(true);
        Ok(())
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_sender.borrow()
    }

    /// Gets the registry of live sessions.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Gets the broadcaster shared by the handling units.
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Number of sessions currently registered.
    pub fn connected_users(&self) -> usize {
        self.registry.size()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            registry: self.registry.clone(),
            broadcaster: self.broadcaster.clone(),
            shutdown: self.shutdown_sender.subscribe(),
            write_timeout: self.config.write_timeout,
            max_connections: self.config.max_connections,
        }
    }
}

fn log_handler_exit(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            error!("Connection handler panicked: {}", e);
        } else {
            debug!("Connection handler cancelled: {}", e);
        }
    }
}
