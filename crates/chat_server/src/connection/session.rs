//! Per-connection session state.
//!
//! A [`Session`] owns the write half of one client's transport together with
//! the participant's identity. The read half stays with the handling unit
//! that services the session, so writers (the broadcaster, command replies)
//! and the reader never contend for the same lock.

use super::SessionId;
use crate::protocol::PLACEHOLDER_NAME;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// The write half of a client transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Represents one connected participant.
///
/// # Fields
///
/// * `id` - Unique id assigned at accept time
/// * `remote_addr` - The network address of the client
/// * `connected_at` - When the connection was accepted
/// * `display_name` - Set once during the handshake
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    display_name: OnceLock<String>,
    writer: Mutex<Option<WriterSlot>>,
    write_timeout: Duration,
    evicted: Notify,
    failed: AtomicBool,
    departed: AtomicBool,
}

struct WriterSlot(BoxedWriter);

impl std::fmt::Debug for WriterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WriterSlot")
    }
}

impl Session {
    /// Creates a new session around the write half of a transport.
    ///
    /// The session starts without a display name; [`Session::display_name`]
    /// reports the placeholder until the handshake sets one.
    pub fn new(
        remote_addr: SocketAddr,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id: SessionId::new(),
            remote_addr,
            connected_at: SystemTime::now(),
            display_name: OnceLock::new(),
            writer: Mutex::new(Some(WriterSlot(Box::new(writer)))),
            write_timeout,
            evicted: Notify::new(),
            failed: AtomicBool::new(false),
            departed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// The participant's name, or the placeholder before the handshake.
    pub fn display_name(&self) -> &str {
        self.display_name
            .get()
            .map(String::as_str)
            .unwrap_or(PLACEHOLDER_NAME)
    }

    /// Whether the handshake has established a name.
    pub fn has_display_name(&self) -> bool {
        self.display_name.get().is_some()
    }

    /// Sets the display name. Returns `false` if one was already set; the
    /// first name wins for the lifetime of the session.
    pub fn set_display_name(&self, name: impl Into<String>) -> bool {
        self.display_name.set(name.into()).is_ok()
    }

    /// Writes one line to the client.
    ///
    /// Never returns an error: any I/O failure, a write that does not finish
    /// within the write timeout, or a session that was already closed all
    /// report `false`. The timeout also covers waiting for the writer, so
    /// concurrent senders cannot stack their timeouts. After the first
    /// failure every later send returns `false` without touching the
    /// transport. The caller decides whether to deregister.
    pub async fn send(&self, text: &str) -> bool {
        if self.has_failed() {
            return false;
        }

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        let write = async {
            let mut slot = self.writer.lock().await;
            match slot.as_mut() {
                Some(WriterSlot(writer)) if !self.has_failed() => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                }
                _ => Err(io::Error::new(io::ErrorKind::NotConnected, "session is closed")),
            }
        };

        let delivered = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Write to session {} failed: {}", self.id, e);
                false
            }
            Err(_) => {
                warn!(
                    "Write to session {} timed out after {:?}",
                    self.id, self.write_timeout
                );
                false
            }
        };

        if !delivered {
            self.failed.store(true, Ordering::Release);
        }
        delivered
    }

    /// Whether a write has failed or the session was closed.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Releases the transport. Safe to call any number of times; only the
    /// first call shuts the writer down.
    pub async fn close(&self) {
        self.failed.store(true, Ordering::Release);
        let taken = self.writer.lock().await.take();
        if let Some(WriterSlot(mut writer)) = taken {
            if let Ok(Err(e)) = tokio::time::timeout(self.write_timeout, writer.shutdown()).await {
                debug!("Shutdown of session {} transport failed: {}", self.id, e);
            }
        }
    }

    /// Whether [`Session::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }

    /// Asks the handling unit to stop servicing this session.
    ///
    /// The permit is stored, so a handling unit that is not currently
    /// waiting still observes it on its next wait.
    pub fn signal_eviction(&self) {
        self.evicted.notify_one();
    }

    /// Completes once [`Session::signal_eviction`] has been called.
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }

    /// Claims the teardown of this session. Only the first caller gets
    /// `true`; everyone else must treat the teardown as already done.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.departed.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_writes_one_line() {
        let (client, server) = tokio::io::duplex(1024);
        let session = Session::new(addr(), server, Duration::from_secs(1));

        assert!(session.send("hello").await);
        assert!(session.send("world").await);

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_send_reports_failure_when_peer_gone() {
        let (client, server) = tokio::io::duplex(64);
        let session = Session::new(addr(), server, Duration::from_secs(1));
        drop(client);

        assert!(!session.send("anyone there?").await);
    }

    #[tokio::test]
    async fn test_send_times_out_on_stalled_peer() {
        // Nobody reads the client end, so the small buffer fills up.
        let (_client, server) = tokio::io::duplex(8);
        let session = Session::new(addr(), server, Duration::from_millis(50));

        let long = "x".repeat(64);
        assert!(!session.send(&long).await);
        assert!(session.has_failed());

        // Later sends give up without waiting out another timeout.
        let started = std::time::Instant::now();
        assert!(!session.send("short").await);
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_concurrent_sends_share_one_timeout() {
        let (_client, server) = tokio::io::duplex(4);
        let session = Session::new(addr(), server, Duration::from_millis(200));

        let started = std::time::Instant::now();
        let results = futures::future::join_all(
            (0..5).map(|i| {
                let session = &session;
                async move { session.send(&format!("line number {i}")).await }
            }),
        )
        .await;

        assert!(results.iter().all(|delivered| !delivered));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = tokio::io::duplex(64);
        let session = Session::new(addr(), server, Duration::from_secs(1));

        session.close().await;
        session.close().await;
        assert!(session.is_closed().await);
        assert!(!session.send("after close").await);

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_display_name_set_once() {
        let (_client, server) = tokio::io::duplex(64);
        let session = Session::new(addr(), server, Duration::from_secs(1));

        assert_eq!(session.display_name(), PLACEHOLDER_NAME);
        assert!(!session.has_display_name());

        assert!(session.set_display_name("alice"));
        assert!(!session.set_display_name("mallory"));
        assert_eq!(session.display_name(), "alice");
        assert!(session.has_display_name());
    }

    #[tokio::test]
    async fn test_teardown_claimed_once() {
        let (_client, server) = tokio::io::duplex(64);
        let session = Session::new(addr(), server, Duration::from_secs(1));

        assert!(session.begin_teardown());
        assert!(!session.begin_teardown());
    }

    #[tokio::test]
    async fn test_eviction_signal_is_remembered() {
        let (_client, server) = tokio::io::duplex(64);
        let session = Session::new(addr(), server, Duration::from_secs(1));

        session.signal_eviction();
        tokio::time::timeout(Duration::from_millis(100), session.evicted())
            .await
            .expect("stored eviction permit should complete immediately");
    }
}
