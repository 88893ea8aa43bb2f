//! Per-connection handling unit.
//!
//! One of these runs for every accepted connection. It owns the read half of
//! the transport and walks the session through handshake, the active
//! read loop and finally teardown.

use crate::connection::{Registry, Session};
use crate::messaging::{commands, BroadcastMessage, Broadcaster};
use crate::protocol;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent the quit token
    Quit,
    /// The client closed its side of the stream
    EndOfStream,
    /// Reading from the client failed
    ReadError(String),
    /// Writing to the client failed
    WriteFailed,
    /// The broadcaster evicted the session after a failed write
    Evicted,
    /// The server is shutting down
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Quit => write!(f, "quit"),
            DisconnectReason::EndOfStream => write!(f, "end of stream"),
            DisconnectReason::ReadError(e) => write!(f, "read error: {e}"),
            DisconnectReason::WriteFailed => write!(f, "write failed"),
            DisconnectReason::Evicted => write!(f, "evicted"),
            DisconnectReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Splits client input into lines.
///
/// Lines end at `\n` with an optional `\r` before it. Bytes that are not
/// UTF-8 become U+FFFD instead of failing the read. Partially read bytes stay
/// in `buf`, so a cancelled [`LineReader::next_line`] loses nothing.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// The next line without its terminator, or `None` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.inner.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Shared state every handling unit needs.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub registry: Arc<Registry>,
    pub broadcaster: Broadcaster,
    pub shutdown: watch::Receiver<bool>,
    pub write_timeout: Duration,
    pub max_connections: usize,
}

/// Services one connection from registration to teardown.
pub(crate) async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    remote_addr: SocketAddr,
    mut ctx: ConnectionContext,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    if ctx.registry.size() >= ctx.max_connections {
        warn!(
            "Rejecting {}: {} session(s) already connected",
            remote_addr, ctx.max_connections
        );
        let reject = async {
            writer.write_all(protocol::SERVER_FULL.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.shutdown().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(ctx.write_timeout, reject).await {
            debug!("Failed to notify rejected client {}: {}", remote_addr, e);
        }
        return;
    }

    let session = Arc::new(Session::new(remote_addr, writer, ctx.write_timeout));
    if let Err(e) = ctx.registry.add(session.clone()) {
        error!("Failed to register session from {}: {}", remote_addr, e);
        session.close().await;
        return;
    }
    info!(
        "New client connected from {} as session {}. Total clients: {}",
        remote_addr,
        session.id(),
        ctx.registry.size()
    );

    let mut lines = LineReader::new(reader);
    let reason = match converse(&session, &mut lines, &mut ctx).await {
        Ok(()) => DisconnectReason::Quit,
        Err(reason) => reason,
    };

    disconnect(&session, &ctx.registry, &ctx.broadcaster, &reason).await;
}

/// Handshake followed by the active read loop. Returns `Ok` when the client
/// quits and the reason otherwise.
async fn converse<R>(
    session: &Arc<Session>,
    lines: &mut LineReader<R>,
    ctx: &mut ConnectionContext,
) -> Result<(), DisconnectReason>
where
    R: AsyncRead + Unpin,
{
    send(session, protocol::NAME_PROMPT).await?;
    let raw_name = next_line(session, lines, &mut ctx.shutdown).await?;

    session.set_display_name(protocol::display_name(&raw_name));
    let name = session.display_name();

    send(session, &protocol::welcome(name)).await?;
    send(session, &protocol::usage_hint()).await?;

    info!("User '{}' joined the chat", name);
    ctx.broadcaster
        .broadcast(&BroadcastMessage::excluding(protocol::joined(name), session.id()))
        .await;

    loop {
        let line = next_line(session, lines, &mut ctx.shutdown).await?;

        if protocol::is_quit(&line) {
            return Ok(());
        }

        if protocol::is_command(&line) {
            let reply = commands::interpret(&line, ctx.registry.size());
            send(session, &reply).await?;
            continue;
        }

        let message = protocol::chat_line(name, &line);
        debug!("{}", message);
        ctx.broadcaster
            .broadcast(&BroadcastMessage::excluding(message, session.id()))
            .await;
    }
}

async fn send(session: &Session, text: &str) -> Result<(), DisconnectReason> {
    if session.send(text).await {
        Ok(())
    } else {
        Err(DisconnectReason::WriteFailed)
    }
}

/// Reads the next line, giving up early on eviction or shutdown.
async fn next_line<R>(
    session: &Session,
    lines: &mut LineReader<R>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<String, DisconnectReason>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => match line {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(DisconnectReason::EndOfStream),
            Err(e) => Err(DisconnectReason::ReadError(e.to_string())),
        },
        _ = session.evicted() => Err(DisconnectReason::Evicted),
        _ = shutdown_requested(shutdown) => Err(DisconnectReason::Shutdown),
    }
}

/// Completes once shutdown is requested or the server is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&stop| stop).await;
}

/// Terminal state of every session. Only the first call for a session does
/// anything, so racing teardown paths produce a single departure notice.
pub(crate) async fn disconnect(
    session: &Session,
    registry: &Registry,
    broadcaster: &Broadcaster,
    reason: &DisconnectReason,
) {
    if !session.begin_teardown() {
        return;
    }

    registry.remove(session.id());

    match reason {
        DisconnectReason::ReadError(_) | DisconnectReason::WriteFailed => warn!(
            "Session {} from {} ended: {}",
            session.id(),
            session.remote_addr(),
            reason
        ),
        _ => debug!(
            "Session {} from {} ended: {}",
            session.id(),
            session.remote_addr(),
            reason
        ),
    }

    if session.has_display_name() {
        let name = session.display_name();
        broadcaster
            .broadcast(&BroadcastMessage::excluding(protocol::left(name), session.id()))
            .await;
        info!("User '{}' left the chat", name);
    }

    session.close().await;
    info!("Client disconnected. Total clients: {}", registry.size());
}
